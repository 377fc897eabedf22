//! A stdout plugin that prints nothing. Useful for tests and for
//! embedding the engine where another layer owns the terminal.

use crate::callback::{CallbackPlugin, CallbackType};

pub struct NullCallback;

impl CallbackPlugin for NullCallback {
    fn name(&self) -> &str {
        "null"
    }

    fn callback_type(&self) -> CallbackType {
        CallbackType::Stdout
    }
}
