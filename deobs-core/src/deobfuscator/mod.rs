pub mod lexer;
pub mod literal;
pub mod source;
pub mod string_table;
pub mod dead_code;
pub mod formatter;
pub mod pipeline;
pub mod external;
pub mod processor;
pub mod batch;
pub mod error;
