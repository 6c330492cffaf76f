use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Find catalog items matching free-text descriptions
    Match {
        /// Item description; repeat for several
        #[clap(short, long = "description", required = true)]
        descriptions: Vec<String>,

        /// Only items for this gender (or unisex)
        #[clap(short, long)]
        gender: Option<String>,

        /// Leave out items of this category
        #[clap(short = 'x', long)]
        exclude_category: Option<String>,

        /// Matches kept per description
        #[clap(short = 'n', long)]
        top_n: Option<usize>,
    },

    /// Print catalog statistics
    Catalog {},

    /// Suggest catalog items that go with a garment photo
    Recommend {
        /// Path to the image
        image: PathBuf,

        /// Matches kept per suggested item
        #[clap(short = 'n', long)]
        top_n: Option<usize>,

        /// Skip the compatibility check on each match
        #[clap(long, default_value = "false")]
        no_check: bool,
    },

    /// Serve the HTTP API
    Daemon {
        #[clap(short, long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match() {
        let args = Args::try_parse_from([
            "outfit-match",
            "match",
            "-d",
            "white sneakers",
            "--description",
            "black jeans",
            "--gender",
            "Women",
            "-x",
            "Jackets",
            "-n",
            "3",
        ])
        .unwrap();

        match args.command {
            Command::Match {
                descriptions,
                gender,
                exclude_category,
                top_n,
            } => {
                assert_eq!(descriptions, vec!["white sneakers", "black jeans"]);
                assert_eq!(gender.as_deref(), Some("Women"));
                assert_eq!(exclude_category.as_deref(), Some("Jackets"));
                assert_eq!(top_n, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_match_needs_a_description() {
        assert!(Args::try_parse_from(["outfit-match", "match"]).is_err());
    }

    #[test]
    fn test_parse_recommend_and_daemon() {
        let args =
            Args::try_parse_from(["outfit-match", "recommend", "jacket.png", "--no-check"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Recommend { no_check: true, top_n: None, .. }
        ));

        let args = Args::try_parse_from(["outfit-match", "daemon"]).unwrap();
        assert!(matches!(args.command, Command::Daemon { addr } if addr == "0.0.0.0:8080"));
    }
}
