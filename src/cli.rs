use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Semantic file indexing and similarity search", long_about = None)]
pub struct Args {
    /// Wait for another semdex process to release the index instead of failing
    #[clap(long, global = true, default_value = "false")]
    pub wait: bool,

    /// Don't draw a progress bar while indexing
    #[clap(long, global = true, default_value = "false")]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Index (or reindex) the files of a directory
    Index {
        /// Directory to index
        dir: PathBuf,

        /// Only index the top level of the directory
        #[clap(long, default_value = "false")]
        no_recursive: bool,

        /// Comma separated extensions to index instead of the configured ones
        /// (e.g. "md,txt")
        #[clap(short, long, value_delimiter = ',')]
        ext: Option<Vec<String>>,
    },

    /// Search indexed chunks by meaning
    Search {
        /// Query text
        query: String,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score in [-1.0, 1.0]
        #[clap(short, long, allow_negative_numbers = true)]
        min_similarity: Option<f32>,
    },

    /// Find chunks of other files similar to an indexed file
    Similar {
        /// Indexed file
        path: PathBuf,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<usize>,
    },

    /// Show index statistics
    Stats,

    /// Remove a file from the index
    Remove {
        /// Indexed file
        path: PathBuf,
    },
}

impl Command {
    /// Whether the command needs the embedding model loaded.
    pub fn needs_model(&self) -> bool {
        matches!(self, Command::Index { .. } | Command::Search { .. })
    }

    /// Whether the command writes to the index.
    pub fn mutates(&self) -> bool {
        matches!(self, Command::Index { .. } | Command::Remove { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_with_extensions() {
        let args = Args::try_parse_from(["semdex", "index", "/docs", "--no-recursive", "--ext", "md,txt"])
            .unwrap();

        match args.command {
            Command::Index {
                dir,
                no_recursive,
                ext,
            } => {
                assert_eq!(dir, PathBuf::from("/docs"));
                assert!(no_recursive);
                assert_eq!(ext, Some(vec!["md".to_string(), "txt".to_string()]));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_search_options() {
        let args = Args::try_parse_from(["semdex", "search", "fox", "-l", "3", "-m", "0.5", "--wait"])
            .unwrap();

        assert!(args.wait);
        match args.command {
            Command::Search {
                query,
                limit,
                min_similarity,
            } => {
                assert_eq!(query, "fox");
                assert_eq!(limit, Some(3));
                assert_eq!(min_similarity, Some(0.5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_command_capabilities() {
        let stats = Args::try_parse_from(["semdex", "stats"]).unwrap().command;
        assert!(!stats.needs_model());
        assert!(!stats.mutates());

        let remove = Args::try_parse_from(["semdex", "remove", "a.txt"]).unwrap().command;
        assert!(!remove.needs_model());
        assert!(remove.mutates());
    }
}
