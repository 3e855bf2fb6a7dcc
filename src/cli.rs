//! Minimal CLI parsing for the report binary.

use std::env;
use std::path::PathBuf;

use serde_json::Value;

use crate::services::Params;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub seed: Option<PathBuf>,
    /// List members instead of the leaderboard.
    pub members: bool,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub start: Option<String>,
    pub limit: Option<String>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = || inline.clone().or_else(|| args.next());
            match flag.as_str() {
                "--members" => options.members = true,
                "--seed" => options.seed = value().map(PathBuf::from),
                "--search" => options.search = value(),
                "--sort" => options.sort = value(),
                "--start" => options.start = value(),
                "--limit" => options.limit = value(),
                _ => {}
            }
        }
        options
    }

    /// Request parameters for the selected listing.
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        let search_key = if self.members { "_q" } else { "search" };
        let entries = [
            (search_key, &self.search),
            ("_sort", &self.sort),
            ("_start", &self.start),
            ("_limit", &self.limit),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                params.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let options = parse(&["--seed", "seed.json", "--limit=5", "--sort", "speed:asc", "--bogus"]);
        assert_eq!(options.seed, Some(PathBuf::from("seed.json")));
        assert_eq!(options.limit.as_deref(), Some("5"));
        assert_eq!(options.sort.as_deref(), Some("speed:asc"));
        assert!(!options.members);
    }

    #[test]
    fn test_params_for_rankings_and_members() {
        let rankings = parse(&["--search", "alp", "--start", "2"]);
        assert_eq!(
            Value::Object(rankings.params()),
            json!({"search": "alp", "_start": "2"})
        );

        let members = parse(&["--members", "--search", "alp"]);
        assert_eq!(Value::Object(members.params()), json!({"_q": "alp"}));
    }
}
