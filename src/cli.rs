use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_ARCHIVE_URL: &str = "https://pof.ois.unsa.ba/index.php/pof/issue/archive";

#[derive(Parser, Debug)]
#[command(
    name = "pof-harvest",
    version,
    about = "Harvest a Bosnian/Croatian/Serbian text corpus from the POF journal archive"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover issues and their articles and write the index manifest
    Index(IndexArgs),
    /// Run the scrape-filter-extract pipeline and append accepted articles to the corpus
    Harvest(HarvestArgs),
    /// Show checkpoint position, counts and failure reasons
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = "scraped_articles")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_ARCHIVE_URL)]
    pub archive_url: String,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub limit_issues: Option<usize>,

    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HarvestArgs {
    #[arg(long, default_value = "scraped_articles")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_ARCHIVE_URL)]
    pub archive_url: String,

    /// Maximum number of issues to visit (default: all)
    #[arg(long)]
    pub limit_issues: Option<usize>,

    /// Maximum number of articles to visit per issue (default: all)
    #[arg(long)]
    pub limit_articles: Option<usize>,

    /// Checkpoint after this many accepted articles
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub save_interval: u32,

    /// Start at this article (inclusive), written as `<ISSUE_ID>|<PDF_URL>`
    #[arg(long)]
    pub resume_from: Option<String>,

    /// Ignore and discard the existing checkpoint, ledger and corpus
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    #[arg(long, default_value_t = false)]
    pub refresh_index: bool,

    #[arg(long)]
    pub browserless_url: Option<String>,

    #[arg(long)]
    pub browserless_token: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_browser_fallback: bool,

    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 2000)]
    pub base_delay_ms: u64,

    #[arg(long, default_value_t = 60_000)]
    pub max_delay_ms: u64,

    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = 3000)]
    pub article_delay_ms: u64,

    #[arg(long, default_value_t = 60)]
    pub download_wait_secs: u64,

    #[arg(long, value_enum, default_value_t = OcrMode::Auto)]
    pub ocr_mode: OcrMode,

    #[arg(long, default_value = "hrv+srp_latn+srp")]
    pub ocr_lang: String,

    #[arg(long, default_value_t = 200)]
    pub ocr_min_text_chars: usize,

    #[arg(long, default_value_t = 0.6)]
    pub ocr_min_alpha_ratio: f64,

    #[arg(long, default_value_t = 120)]
    pub ocr_page_timeout_secs: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrMode {
    Off,
    Auto,
    Force,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Force => "force",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "scraped_articles")]
    pub output_dir: PathBuf,
}
