use rust_stemmers::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SearchError;

/// Languages with an independent index. Catalan is analysed with the
/// Spanish stemmer and stopword list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    Ca,
    Pt,
    En,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Es, Language::Ca, Language::Pt, Language::En];

    pub fn code(&self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::Ca => "ca",
            Language::Pt => "pt",
            Language::En => "en",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Es => "Castellano",
            Language::Ca => "Català",
            Language::Pt => "Português",
            Language::En => "English",
        }
    }

    pub(crate) fn stemmer_algorithm(&self) -> Algorithm {
        match self {
            Language::Es | Language::Ca => Algorithm::Spanish,
            Language::Pt => Algorithm::Portuguese,
            Language::En => Algorithm::English,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "es" | "spanish" | "español" => Ok(Language::Es),
            "ca" | "catalan" | "català" => Ok(Language::Ca),
            "pt" | "portuguese" | "português" => Ok(Language::Pt),
            "en" | "english" => Ok(Language::En),
            other => Err(SearchError::UnknownLanguage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_and_names() {
        assert_eq!("es".parse::<Language>().unwrap(), Language::Es);
        assert_eq!(" Portuguese ".parse::<Language>().unwrap(), Language::Pt);
        assert!(matches!("xx".parse::<Language>(), Err(SearchError::UnknownLanguage(_))));
    }

    #[test]
    fn catalan_uses_spanish_stemmer() {
        assert!(matches!(Language::Ca.stemmer_algorithm(), Algorithm::Spanish));
    }
}
