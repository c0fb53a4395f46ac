//! drop - content-addressed file drop
//!
//! Uploads files to a remote www directory via scp and prints a public URL.

use anyhow::Context;
use clap::Parser;
use hashdrop::config::{Registry, RegistryLoader};
use hashdrop::payload::{InputSet, InputSource};
use hashdrop::selftest::{SelfTest, Verifier};
use hashdrop::sink::{CommandSink, UrlSink};
use hashdrop::transport::ScpTransporter;
use hashdrop::upload::{UploadRequest, Uploader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Uploads data to a remote www directory via scp and returns a public URL
#[derive(Parser, Debug)]
#[command(name = "drop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files to upload; several files are zipped. Reads stdin when empty
    files: Vec<PathBuf>,

    /// Name (or unique prefix) of the destination in the configuration
    #[arg(short, long)]
    destination: Option<String>,

    /// List configured destinations and exit
    #[arg(short, long)]
    list: bool,

    /// Overwrite the extension of the uploaded file
    #[arg(short, long)]
    extension: Option<String>,

    /// Keep the original file name inside a hash-named directory
    #[arg(short, long)]
    preserve_name: bool,

    /// Additional configuration file, overriding all others
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Upload a generated test payload and verify it can be fetched back
    #[arg(long, conflicts_with_all = ["files", "preserve_name", "extension"])]
    test: bool,

    /// Do not pass the URL to the configured clipboard command
    #[arg(long)]
    no_clipboard: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())?;
    }
    Ok(())
}

fn load_registry(args: &Args) -> anyhow::Result<Registry> {
    let mut loader = RegistryLoader::standard();
    if let Some(path) = &args.config_file {
        loader = loader.explicit(path);
    }
    loader.load().context("Failed to load destination registry")
}

fn print_destinations(registry: &Registry) {
    let default = registry.default_name();
    for name in registry.names() {
        let marker = if Some(name) == default { "*" } else { " " };
        match registry.get(name) {
            Some(dest) => println!(
                "{} {:<16} {}:{} -> {}",
                marker, name, dest.remote_host, dest.remote_dir, dest.public_url_base
            ),
            None => println!("{} {}", marker, name),
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let registry = load_registry(&args)?;

    if args.list {
        print_destinations(&registry);
        return Ok(());
    }

    let transporter = ScpTransporter::new();
    let sink = match (&registry.defaults().clipboard, args.no_clipboard) {
        (Some(command), false) => Some(CommandSink::parse(command)?),
        _ => None,
    };
    let mut uploader = Uploader::new(&registry, &transporter);
    if let Some(sink) = &sink {
        uploader = uploader.with_sink(sink as &dyn UrlSink);
    }

    if args.test {
        let test = SelfTest::new(Verifier::new()?);
        let outcome = uploader
            .upload(&test.request(args.destination.as_deref()))
            .await?;
        println!("{}", outcome.url);

        if let Err(e) = test.verify(&outcome.url).await {
            eprintln!("Test did not succeed: {}", e);
            return Err(e.into());
        }
        eprintln!("Everything seems to be in order.");
        return Ok(());
    }

    let inputs = if args.files.is_empty() {
        InputSet::single(InputSource::Stdin)
    } else {
        InputSet::new(args.files.iter().cloned().map(InputSource::Path).collect())?
    };

    let mut request = UploadRequest::new(inputs).preserve_name(args.preserve_name);
    if let Some(destination) = &args.destination {
        request = request.destination(destination.clone());
    }
    if let Some(extension) = &args.extension {
        request = request.extension(extension.clone());
    }

    let outcome = uploader.upload(&request).await?;
    info!(destination = %outcome.destination, bytes = outcome.bytes, "Uploaded");
    println!("{}", outcome.url);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("drop: failed to initialize logging: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("drop: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
