//! Diagnostic rendering of handles
//!
//! ```text
//! nil  42  1.5  true  "text"  sym  #3
//! {=thing isa: person name: "Ada" {age: 36}}
//! [1 2 3]
//! ```
//!
//! Frames with an `id` print their definition at the top level and only
//! their id when nested. Nested anonymous frames print inline, down to a
//! fixed depth.

use crate::datum::Datum;
use crate::handle::{Handle, HandleKind};
use std::fmt::Write;

const MAX_DEPTH: usize = 4;

type Resolve<'a> = dyn Fn(Handle) -> Option<Datum> + 'a;

pub(crate) fn render(resolve: &Resolve<'_>, handle: Handle) -> String {
    let mut out = String::new();
    Printer { resolve, out: &mut out }.print(handle, 0);
    out
}

struct Printer<'a, 'o> {
    resolve: &'a Resolve<'a>,
    out: &'o mut String,
}

impl Printer<'_, '_> {
    fn print(&mut self, handle: Handle, depth: usize) {
        match handle.kind() {
            HandleKind::Nil => self.out.push_str("nil"),
            HandleKind::Int(n) => {
                let _ = write!(self.out, "{}", n);
            }
            HandleKind::Float(f) => {
                let _ = write!(self.out, "{:?}", f);
            }
            HandleKind::Bool(b) => {
                let _ = write!(self.out, "{}", b);
            }
            HandleKind::Local(_) | HandleKind::Global(_) => match (self.resolve)(handle) {
                Some(datum) => self.print_datum(handle, &datum, depth),
                None => {
                    let _ = write!(self.out, "<dangling {:?}>", handle);
                }
            },
        }
    }

    fn print_datum(&mut self, handle: Handle, datum: &Datum, depth: usize) {
        match datum {
            Datum::String(s) => {
                let _ = write!(self.out, "{:?}", s);
            }
            Datum::Symbol(_) => {
                let name = self.symbol_name(handle);
                self.out.push_str(&name);
            }
            Datum::Array(elements) => {
                if depth >= MAX_DEPTH {
                    self.out.push_str("[...]");
                    return;
                }
                self.out.push('[');
                for (i, &element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.print(element, depth + 1);
                }
                self.out.push(']');
            }
            Datum::Frame(frame) => {
                let id = frame.ids().next();
                if depth > 0
                    && let Some(id) = id
                {
                    let name = self.symbol_name(id);
                    self.out.push_str(&name);
                    return;
                }
                if depth >= MAX_DEPTH {
                    self.out.push_str("{...}");
                    return;
                }
                self.out.push('{');
                let mut first = true;
                for slot in &frame.slots {
                    if !first {
                        self.out.push(' ');
                    }
                    first = false;
                    if slot.name.is_id() {
                        self.out.push('=');
                        self.print(slot.value, depth + 1);
                        continue;
                    }
                    if !slot.name.is_nil() {
                        self.print(slot.name, depth + 1);
                        self.out.push_str(": ");
                    }
                    self.print(slot.value, depth + 1);
                }
                self.out.push('}');
            }
        }
    }

    fn symbol_name(&self, symbol: Handle) -> String {
        let Some(Datum::Symbol(sym)) = (self.resolve)(symbol) else {
            return format!("<{:?}>", symbol);
        };
        if sym.is_numeric() {
            return format!("#{}", sym.name.as_int());
        }
        match (self.resolve)(sym.name) {
            Some(Datum::String(name)) => name,
            _ => format!("<{:?}>", symbol),
        }
    }
}
