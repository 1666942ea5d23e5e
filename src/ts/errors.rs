use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeSitterError {
    #[error("failed to set {lang} language for parser")]
    LanguageSet { lang: &'static str },

    #[error("failed to parse source code")]
    ParseFailed,
}
