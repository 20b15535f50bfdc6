mod parser;
mod types;

pub(crate) use parser::ModuleSymbols;
