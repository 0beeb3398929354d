use clap::{Parser, Subcommand};
use mf_core::{MediaFormat, PageRange};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(author, version, about = "Policy-guarded media conversion")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single file
    Convert {
        /// Input file to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Target format (extension or MIME type)
        #[arg(short, long)]
        to: MediaFormat,

        /// Source format; detected from the file extension if omitted
        #[arg(long)]
        from: Option<MediaFormat>,

        /// Directory to write artifacts into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Rasterization density for documents
        #[arg(long)]
        dpi: Option<u32>,

        /// Pages to convert, e.g. "2" or "1-3"
        #[arg(long)]
        pages: Option<PageRange>,

        /// Output bounding box width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Output bounding box height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Encoder quality (1-100)
        #[arg(long)]
        quality: Option<u8>,

        /// Text to draw onto the output
        #[arg(long)]
        text: Option<String>,

        /// Font family for --text
        #[arg(long, requires = "text")]
        font: Option<String>,

        /// Font size for --text
        #[arg(long, requires = "text")]
        font_size: Option<u32>,

        /// Text color for --text
        #[arg(long, requires = "text")]
        color: Option<String>,

        /// Job deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Also deliver the result to this URL
        #[arg(long)]
        webhook: Option<String>,
    },

    /// Render a composition (JSON) to MP4
    Compose {
        /// Composition spec file
        #[arg(required = true)]
        spec: PathBuf,

        /// Asset as name=path; repeat for each asset the composition references
        #[arg(short, long = "asset")]
        assets: Vec<String>,

        /// Directory to write the video into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Also deliver the result to this URL
        #[arg(long)]
        webhook: Option<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Show the effective format policy
    Policy {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
