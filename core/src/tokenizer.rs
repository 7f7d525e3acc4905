use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::Stemmer;
use serde::Serialize;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

use crate::language::Language;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}][\p{L}\p{N}_']*").expect("valid regex");
    static ref ENGLISH_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
    static ref SPANISH_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","al","algo","algunas","algunos","ante","antes","como","con","contra","cual","cuando",
            "de","del","desde","donde","durante","e","el","ella","ellas","ellos","en","entre","era","erais","eran","eras","eres",
            "es","esa","esas","ese","eso","esos","esta","estaba","estado","estas","este","esto","estos","fue","fueron","fui",
            "ha","habia","había","han","has","hasta","hay","he","la","las","le","les","lo","los",
            "mas","más","me","mi","mis","mucho","muy","nada","ni","no","nos","nosotros","o","os","otra","otras","otro","otros",
            "para","pero","poco","por","porque","que","qué","quien","quienes","se","sea","ser","si","sí","sido","sin","sobre",
            "son","su","sus","también","tambien","te","tiene","tienen","todo","todos","tu","tus","un","una","uno","unos",
            "y","ya","yo",
            // Catalan function words, analysed with the Spanish pipeline.
            "amb","als","dels","els","és","i","l'","les","per","perquè","què","una","uns","va"
        ];
        words.iter().copied().collect()
    };
    static ref PORTUGUESE_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","ao","aos","aquela","aquele","as","até","com","como","da","das","de","dela","dele","do","dos",
            "e","é","ela","elas","ele","eles","em","entre","era","eram","essa","esse","esta","está","este","eu",
            "foi","foram","há","isso","isto","já","lhe","mais","mas","me","mesmo","meu","minha","muito",
            "na","nas","não","nem","no","nos","nós","o","os","ou","para","pela","pelas","pelo","pelos","por",
            "quando","que","quem","se","sem","ser","seu","sua","são","também","te","tem","um","uma","você"
        ];
        words.iter().copied().collect()
    };
}

/// Turns raw text into the ordered sequence of normalized terms that the
/// index stores. Implementations must be deterministic.
pub trait Preprocessor: Send + Sync {
    fn normalize(&self, text: &str) -> Vec<String>;
}

/// Every intermediate step of the analysis pipeline, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub normalized: String,
    pub tokens: Vec<String>,
    pub without_stopwords: Vec<String>,
    pub stems: Vec<String>,
}

/// NFKC + lowercase + word regex + stopword removal + Snowball stemming.
pub struct Analyzer {
    language: Language,
    stemmer: Stemmer,
    stopwords: &'static HashSet<&'static str>,
}

impl Analyzer {
    pub fn for_language(language: Language) -> Self {
        let stopwords: &'static HashSet<&'static str> = match language {
            Language::Es | Language::Ca => &SPANISH_STOPWORDS,
            Language::Pt => &PORTUGUESE_STOPWORDS,
            Language::En => &ENGLISH_STOPWORDS,
        };
        Self { language, stemmer: Stemmer::create(language.stemmer_algorithm()), stopwords }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }

    pub fn analyze(&self, text: &str) -> Analysis {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        let tokens: Vec<String> = RE.find_iter(&normalized).map(|m| m.as_str().to_string()).collect();
        let without_stopwords: Vec<String> =
            tokens.iter().filter(|t| !self.is_stopword(t)).cloned().collect();
        let stems = without_stopwords.iter().map(|t| self.stemmer.stem(t).into_owned()).collect();
        Analysis { normalized, tokens, without_stopwords, stems }
    }
}

impl Preprocessor for Analyzer {
    fn normalize(&self, text: &str) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        RE.find_iter(&normalized)
            .map(|m| m.as_str())
            .filter(|t| !self.is_stopword(t))
            .map(|t| self.stemmer.stem(t).into_owned())
            .collect()
    }
}

/// Splits on whitespace without stemming or stopwords. Handy for tests and
/// corpora that arrive already normalized.
pub struct WhitespacePreprocessor;

impl Preprocessor for WhitespacePreprocessor {
    fn normalize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|s| s.to_lowercase()).collect()
    }
}
