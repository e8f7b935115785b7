// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! The embedded expression language is OUT OF SCOPE: callers above
//! the core are expected to supply an AST with literals, symbols, parameter
//! slots and applicable procedures. This module defines exactly that
//! interface — nothing more — so the boundary extractor and scan
//! driver have a concrete type to operate on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// A callable procedure value. The evaluator itself lives above the core;
/// this wraps a host closure so tests and the scan driver can exercise
/// filter/map/reduce without a full language implementation.
pub struct Procedure {
	pub name: String,
	f: Box<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl Procedure {
	pub fn new(name: impl Into<String>, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
		Procedure { name: name.into(), f: Box::new(f) }
	}

	pub fn apply(&self, args: &[Value]) -> Value {
		(self.f)(args)
	}
}

impl fmt::Debug for Procedure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<procedure {}>", self.name)
	}
}

/// Expression AST: literals, symbols (column/parameter names or captured
/// outer bindings), parameter-slot references, and applicable forms.
#[derive(Debug, Clone)]
pub enum Expr {
	Literal(Value),
	/// A free identifier: a lambda parameter name, a column name, or a name
	/// resolved through the lambda's captured outer bindings.
	Symbol(String),
	/// A positional parameter-slot reference.
	Param(u32),
	/// `name(args...)` — covers `equal?`, `equal??`, `<`, `<=`, `>`, `>=`,
	/// `and`, and anything else the embedded language can apply.
	Call(String, Vec<Expr>),
}

impl Expr {
	pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
		Expr::Call(name.into(), args)
	}

	pub fn sym(name: impl Into<String>) -> Expr {
		Expr::Symbol(name.into())
	}

	pub fn lit(v: Value) -> Expr {
		Expr::Literal(v)
	}
}

/// A lambda: named parameters over a body expression, plus whatever outer
/// bindings the closure captured at definition time.
#[derive(Debug, Clone)]
pub struct Lambda {
	pub params: Vec<String>,
	pub body: Arc<Expr>,
	pub captures: HashMap<String, Value>,
}

impl Lambda {
	pub fn new(params: Vec<String>, body: Expr) -> Self {
		Lambda { params, body: Arc::new(body), captures: HashMap::new() }
	}

	pub fn with_captures(mut self, captures: HashMap<String, Value>) -> Self {
		self.captures = captures;
		self
	}

	/// Resolve a symbol to a literal VALUE if it names a parameter the
	/// lambda closed over, used by the boundary extractor when the
	/// right-hand side of a comparison is not a literal directly.
	pub fn resolve_capture(&self, name: &str) -> Option<&Value> {
		self.captures.get(name)
	}
}
