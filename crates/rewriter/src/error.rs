use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriterError {
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: lang_c::driver::SyntaxError,
    },

    #[error("{path}:{line}: rewrite target lies inside a macro expansion spelled at line {spelling_line}; rewrite this site by hand")]
    MacroExpansion {
        path: String,
        line: usize,
        spelling_line: usize,
    },

    #[error(transparent)]
    Abi(#[from] ia2_abi::AbiError),

    #[error(transparent)]
    Wrapgen(#[from] ia2_wrapgen::WrapgenError),

    #[error("unsupported C construct: {0}")]
    Unsupported(String),

    #[error("K&R-style or variadic function-pointer type is not supported: {0}")]
    InvalidFnPtrType(String),

    #[error("{path} has no -DPKEY=<N> define in compile_commands.json; add one before rewriting")]
    MissingPkey { path: String },

    #[error("pkey {0} is out of range (0-15) or disjoint from the set of compartments being built")]
    PkeyOutOfRange(u8),

    #[error("{name} is defined in more than one compartment ({first} and {second}); a function may have at most one definition")]
    MultipleDefinitions { name: String, first: u8, second: u8 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RewriterError>;
