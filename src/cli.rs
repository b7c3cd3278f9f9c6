use clap::Parser;
use std::path::PathBuf;

// Command-line interface. Every field is public so tests can build a `Cli`
// directly instead of going through argument parsing.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    long_about = "Shares one directory over the local network.\n Browsing a folder shows an HTML listing with download links.\n Every folder can also be downloaded as a ZIP archive (append ?zip=1 to its URL).\n The directory is created, with a small test file, if it does not exist.\n The server will respond with a 404 Not Found error if the requested file or directory does not exist.\n The server will respond with a 500 error if an archive cannot be built.\n Stop the server with Ctrl+C.\n",
    about = "Share a directory over the local network, with per-folder ZIP downloads."
)]
pub struct Cli {
    /// Directory to share. Created if missing.
    #[arg(short, long, default_value = "FileLinker")]
    pub directory: PathBuf,

    /// Host address to listen on ("0.0.0.0" for every interface, "127.0.0.1" for this machine only).
    #[arg(short, long, default_value = "0.0.0.0")]
    pub listen: String,

    /// Port number to listen on.
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Number of threads in the worker pool.
    #[arg(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Buffer size (in bytes) used when streaming files and archives.
    #[arg(short, long, default_value_t = 8192)]
    pub chunk_size: usize,

    /// Page title used when listing the shared directory itself.
    #[arg(long, default_value = "FileLinker")]
    pub title: String,

    /// Archive name (without ".zip") used when downloading the shared directory itself.
    #[arg(long, default_value = "folder")]
    pub archive_name: String,

    /// Enable verbose logging for debugging (log level: debug).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Enable more detailed logging (log level: info).
    #[arg(long, default_value_t = false)]
    pub detailed_logging: bool,
}
