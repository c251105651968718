//! # Request Normalization
//!
//! Every way of issuing a command ends up as a [`Request`]: a command name, an
//! ordered list of binary-safe arguments and an optional completion callback.
//!
//! Arguments are supplied through the [`ToArgs`] trait, which flattens strings,
//! byte slices, numbers, slices, vectors, arrays and tuples in order. These
//! calls therefore encode the same request:
//! ```text
//! pool.hget(("h", "f"))
//! pool.hget(("h", ["f"]))
//! pool.send_command("hget", ["h", "f"])
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Reply;

/// Completion callback invoked once with the outcome of a command.
pub type Callback = Box<dyn FnOnce(Result<Reply>) + Send + 'static>;

/// Types that can be written as one or more command arguments.
pub trait ToArgs {
    /// Append this value's arguments to `out`, in order.
    fn write_args(&self, out: &mut Vec<Vec<u8>>);

    /// Collect the arguments into a fresh vector.
    fn to_args(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.write_args(&mut out);
        out
    }
}

impl ToArgs for str {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArgs for String {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArgs for [u8] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.to_vec());
    }
}

impl ToArgs for bool {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(if *self { b"1".to_vec() } else { b"0".to_vec() });
    }
}

macro_rules! display_args {
    ($($t:ty),*) => {
        $(
            impl ToArgs for $t {
                fn write_args(&self, out: &mut Vec<Vec<u8>>) {
                    out.push(self.to_string().into_bytes());
                }
            }
        )*
    };
}

display_args!(i8, i16, i32, i64, isize, u16, u32, u64, usize, f32, f64);

impl<T: ToArgs + ?Sized> ToArgs for &T {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        (**self).write_args(out);
    }
}

impl<T: ToArgs> ToArgs for [T] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        for item in self {
            item.write_args(out);
        }
    }
}

impl<T: ToArgs> ToArgs for Vec<T> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        self.as_slice().write_args(out);
    }
}

impl<T: ToArgs, const N: usize> ToArgs for [T; N] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        self.as_slice().write_args(out);
    }
}

impl<T: ToArgs> ToArgs for Option<T> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        if let Some(value) = self {
            value.write_args(out);
        }
    }
}

impl ToArgs for () {
    fn write_args(&self, _out: &mut Vec<Vec<u8>>) {}
}

macro_rules! tuple_args {
    ($($name:ident)+) => {
        impl<$($name: ToArgs),+> ToArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_args(&self, out: &mut Vec<Vec<u8>>) {
                let ($($name,)+) = self;
                $($name.write_args(out);)+
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A B);
tuple_args!(A B C);
tuple_args!(A B C D);
tuple_args!(A B C D E);
tuple_args!(A B C D E F);
tuple_args!(A B C D E F G);
tuple_args!(A B C D E F G H);

/// A normalized command awaiting a connection.
pub struct Request {
    command: String,
    args: Vec<Vec<u8>>,
    callback: Option<Callback>,
}

impl Request {
    /// Build a request, rejecting malformed command names.
    ///
    /// The name must be non-empty and must not contain whitespace or control
    /// characters; it is sent to the server as-is.
    pub fn new<A: ToArgs + ?Sized>(command: &str, args: &A) -> Result<Self> {
        validate_command(command)?;
        Ok(Self {
            command: command.to_string(),
            args: args.to_args(),
            callback: None,
        })
    }

    /// Attach the completion callback.
    ///
    /// A request carries at most one callback; supplying a second one is a
    /// usage error rather than silently replacing the first.
    pub fn with_callback<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        self.with_boxed_callback(Box::new(callback))
    }

    pub(crate) fn with_boxed_callback(mut self, callback: Callback) -> Result<Self> {
        if self.callback.is_some() {
            return Err(Error::usage(format!(
                "{}: callback supplied twice, pass it either with the request or alongside it",
                self.command
            )));
        }
        self.callback = Some(callback);
        Ok(self)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Vec<u8>>, Option<Callback>) {
        (self.command, self.args, self.callback)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("args", &self.args.len())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() {
        return Err(Error::usage("command name must not be empty"));
    }
    if command
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::usage(format!(
            "command name must be a single word, not {:?}",
            command
        )));
    }
    Ok(())
}
