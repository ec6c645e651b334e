pub mod safe_converter;
