use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("bad spec {spec:?}: parameter section is missing its closing ']'")]
    UnterminatedParameters { spec: String },
    #[error("bad spec {spec:?}: malformed parameter fragment {fragment:?}")]
    MalformedFragment { spec: String, fragment: String },
    #[error("resource quantity in {token:?} does not fit in 64 bits")]
    QuantityOverflow { token: String },
}
