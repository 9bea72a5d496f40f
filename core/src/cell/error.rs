use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellError {
    #[error("Bag of cells serialization error ({0})")]
    BocSerializationError(String),

    #[error("Bag of cells deserialization error ({0})")]
    BocDeserializationError(String),

    #[error("Cell builder error ({0})")]
    BuilderError(String),

    #[error("Cell parser error ({0})")]
    ParserError(String),

    #[error("Cell underflow (requested {requested} bits, {remaining} remaining)")]
    Underflow { requested: usize, remaining: usize },

    #[error("Invalid reference index (index: {idx}, reference count: {ref_count})")]
    InvalidIndex { idx: usize, ref_count: usize },

    #[error("Invalid special cell ({0})")]
    InvalidSpecialCell(String),

    #[error("Cell not found ({0})")]
    CellNotFound(String),

    #[error("Internal error ({0})")]
    InternalError(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub trait MapCellError<R, E> {
    fn map_boc_serialization_error(self) -> Result<R, CellError>;

    fn map_boc_deserialization_error(self) -> Result<R, CellError>;

    fn map_builder_error(self) -> Result<R, CellError>;

    fn map_parser_error(self) -> Result<R, CellError>;
}

impl<R, E> MapCellError<R, E> for Result<R, E>
where
    E: std::error::Error,
{
    fn map_boc_serialization_error(self) -> Result<R, CellError> {
        self.map_err(|e| CellError::BocSerializationError(e.to_string()))
    }

    fn map_boc_deserialization_error(self) -> Result<R, CellError> {
        self.map_err(|e| CellError::BocDeserializationError(e.to_string()))
    }

    fn map_builder_error(self) -> Result<R, CellError> {
        self.map_err(|e| CellError::BuilderError(e.to_string()))
    }

    fn map_parser_error(self) -> Result<R, CellError> {
        self.map_err(|e| CellError::ParserError(e.to_string()))
    }
}

impl CellError {
    pub fn boc_serialization_error<T: ToString>(e: T) -> CellError {
        CellError::BocSerializationError(e.to_string())
    }

    pub fn boc_deserialization_error<T: ToString>(e: T) -> CellError {
        CellError::BocDeserializationError(e.to_string())
    }

    pub fn builder_error<T: ToString>(e: T) -> CellError {
        CellError::BuilderError(e.to_string())
    }

    pub fn parser_error<T: ToString>(e: T) -> CellError {
        CellError::ParserError(e.to_string())
    }
}
