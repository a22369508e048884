use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start pagerag as a service.
    Daemon {},

    /// Index chunks of a page, replacing whatever the url had before
    Add {
        /// Page url the chunks belong to
        #[clap(short, long)]
        url: String,

        /// A chunk of text. Repeatable.
        /// Reads one chunk per line from stdin when omitted.
        #[clap(short, long = "chunk")]
        chunks: Vec<String>,
    },

    /// Search indexed chunks
    Search {
        /// Query text
        query: String,

        /// Max number of results
        #[clap(short, long)]
        k: Option<usize>,
    },

    /// Remove every chunk of a url
    Delete {
        /// A url
        #[clap(allow_hyphen_values = true)]
        url: String,
    },

    /// Remove everything from the index
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Print index counters
    Stats {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_repeated_chunks() {
        let args = Args::try_parse_from([
            "pagerag",
            "add",
            "--url",
            "https://example.com",
            "--chunk",
            "first chunk of text",
            "-c",
            "second chunk of text",
        ])
        .unwrap();

        match args.command {
            Command::Add { url, chunks } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(chunks, vec!["first chunk of text", "second chunk of text"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_search_k_is_optional() {
        let args = Args::try_parse_from(["pagerag", "search", "rust lifetimes"]).unwrap();
        assert!(matches!(args.command, Command::Search { k: None, .. }));

        let args = Args::try_parse_from(["pagerag", "search", "rust lifetimes", "-k", "3"]).unwrap();
        assert!(matches!(args.command, Command::Search { k: Some(3), .. }));
    }

    #[test]
    fn test_add_requires_url() {
        assert!(Args::try_parse_from(["pagerag", "add", "--chunk", "text"]).is_err());
    }
}
