pub mod probe;
pub mod util;
pub mod test_util;
