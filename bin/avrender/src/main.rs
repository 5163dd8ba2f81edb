mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "avrender")]
#[command(about = "Avatar-video rendering driver for the studio web app", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a batch of audio segments into avatar videos
    Render {
        /// Directory containing audio files
        #[arg(long)]
        audio_dir: PathBuf,

        /// Output directory for videos
        #[arg(long)]
        output_dir: PathBuf,

        /// Run the launched browser headless
        #[arg(long)]
        headless: bool,

        /// Render only this segment (filename without extension)
        #[arg(long)]
        segment: Option<String>,

        /// Attach to an already-running browser instead of launching
        #[arg(long)]
        attach: bool,

        /// Control endpoint for --attach (default from config)
        #[arg(long)]
        cdp_url: Option<String>,
    },

    /// Concatenate rendered segment videos into a delivery file
    Compose {
        /// Directory containing rendered segment videos
        #[arg(long)]
        segments_dir: PathBuf,

        /// Output file for the concatenated video
        #[arg(long)]
        output: PathBuf,

        /// Also produce a size-reduced 720p delivery file
        #[arg(long)]
        compress: bool,
    },

    /// Run environment diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Render {
            audio_dir,
            output_dir,
            headless,
            segment,
            attach,
            cdp_url,
        } => {
            let all_ok = commands::render::run(
                &audio_dir,
                &output_dir,
                headless,
                segment.as_deref(),
                attach,
                cdp_url,
            )
            .await?;
            if !all_ok {
                std::process::exit(1);
            }
        }
        Commands::Compose {
            segments_dir,
            output,
            compress,
        } => {
            commands::compose::run(&segments_dir, &output, compress).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
    }

    Ok(())
}
