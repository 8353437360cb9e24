mod percentage;
mod rgb;

pub use percentage::*;
pub use rgb::*;
