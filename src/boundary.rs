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

//! Turns a filter lambda into a canonicalized BOUNDARY SET: an equality
//! prefix plus at most one trailing range, usable as an index key range.
//!
//! Recognizes `equal?`/`equal??`, `<`, `<=`, `>`, `>=` and `and` over a
//! lambda parameter on the left and a literal (or captured outer binding) on
//! the right. Everything else — OR, negation, calls the extractor doesn't
//! know — is ignored; that only loses selectivity, it never narrows the
//! range past what the filter actually allows.

use std::collections::HashMap;

use crate::expr::{Expr, Lambda};
use crate::value::{compare, Value};
use std::cmp::Ordering;

/// One column's extracted range: `lower`/`upper` are `None` when unbounded.
/// An equality predicate sets both to the same value, both inclusive.
#[derive(Debug, Clone)]
pub struct Bound {
	pub column: String,
	pub lower: Option<Value>,
	pub lower_inclusive: bool,
	pub upper: Option<Value>,
	pub upper_inclusive: bool,
}

impl Bound {
	fn unbounded(column: String) -> Self {
		Bound { column, lower: None, lower_inclusive: false, upper: None, upper_inclusive: false }
	}

	/// A full equality prefix bound: `lower == upper`, both inclusive.
	pub fn is_equality(&self) -> bool {
		matches!((&self.lower, &self.upper), (Some(l), Some(u)) if l == u) && self.lower_inclusive && self.upper_inclusive
	}
}

/// Canonicalized set: equalities first (alphabetized by column), then at
/// most one range column at the tail.
#[derive(Debug, Clone, Default)]
pub struct BoundarySet {
	pub bounds: Vec<Bound>,
}

impl BoundarySet {
	pub fn is_empty(&self) -> bool {
		self.bounds.is_empty()
	}

	/// The values a row must match/fall within at this position, in
	/// `bounds` order, used as an index key.
	pub fn lower_key(&self) -> Vec<Value> {
		self.bounds.iter().map(|b| b.lower.clone().unwrap_or(Value::Nil)).collect()
	}
}

/// Where a candidate row's key sits relative to a boundary set, used both as
/// the correctness predicate (`Within` ⇔ "matches") and as the streaming
/// merge's early-exit signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
	Before,
	Within,
	After,
}

impl Position {
	pub fn is_within(self) -> bool {
		matches!(self, Position::Within)
	}
}

/// `row_within_bounds`: `values` are the row's values for each bound's
/// column, in `bset.bounds` order.
pub fn row_within_bounds(values: &[Value], bset: &BoundarySet) -> Position {
	for (i, bound) in bset.bounds.iter().enumerate() {
		let v = &values[i];
		let is_last = i + 1 == bset.bounds.len();
		if !is_last || bound.is_equality() {
			if let Some(lower) = &bound.lower {
				match compare(v, lower) {
					Ordering::Less => return Position::Before,
					Ordering::Greater if bound.is_equality() => return Position::After,
					_ => {}
				}
			}
			if bound.is_equality() {
				continue;
			}
		}
		if is_last {
			if let Some(lower) = &bound.lower {
				match compare(v, lower) {
					Ordering::Less => return Position::Before,
					Ordering::Equal if !bound.lower_inclusive => return Position::Before,
					_ => {}
				}
			}
			if let Some(upper) = &bound.upper {
				match compare(v, upper) {
					Ordering::Greater => return Position::After,
					Ordering::Equal if !bound.upper_inclusive => return Position::After,
					_ => {}
				}
			}
		}
	}
	Position::Within
}

struct BoundAcc {
	lower: Option<(Value, bool)>,
	upper: Option<(Value, bool)>,
}

impl BoundAcc {
	fn new() -> Self {
		BoundAcc { lower: None, upper: None }
	}

	/// Intersection rule for two predicates AND-ed on the same column
	///: the tighter bound wins outright; when two
	/// bounds tie exactly, inclusivity is OR-ed (documented simplification,
	/// pinned by the property test rather than re-derived per call site).
	fn merge_lower(&mut self, value: Value, inclusive: bool) {
		self.lower = Some(match self.lower.take() {
			None => (value, inclusive),
			Some((existing, existing_incl)) => match compare(&value, &existing) {
				Ordering::Greater => (value, inclusive),
				Ordering::Less => (existing, existing_incl),
				Ordering::Equal => (existing, existing_incl || inclusive),
			},
		});
	}

	fn merge_upper(&mut self, value: Value, inclusive: bool) {
		self.upper = Some(match self.upper.take() {
			None => (value, inclusive),
			Some((existing, existing_incl)) => match compare(&value, &existing) {
				Ordering::Less => (value, inclusive),
				Ordering::Greater => (existing, existing_incl),
				Ordering::Equal => (existing, existing_incl || inclusive),
			},
		});
	}

	fn merge_eq(&mut self, value: Value) {
		self.merge_lower(value.clone(), true);
		self.merge_upper(value, true);
	}
}

fn resolve_column<'a>(expr: &'a Expr, filter_columns: &[String]) -> Option<&'a str> {
	match expr {
		Expr::Symbol(name) if filter_columns.iter().any(|c| c == name) => Some(name),
		_ => None,
	}
}

fn resolve_literal(expr: &Expr, lambda: &Lambda) -> Option<Value> {
	match expr {
		Expr::Literal(v) => Some(v.clone()),
		Expr::Symbol(name) => lambda.resolve_capture(name).cloned(),
		_ => None,
	}
}

fn walk(expr: &Expr, filter_columns: &[String], lambda: &Lambda, acc: &mut HashMap<String, BoundAcc>) {
	let Expr::Call(name, args) = expr else { return };
	if name == "and" {
		for a in args {
			walk(a, filter_columns, lambda, acc);
		}
		return;
	}
	if args.len() != 2 {
		return;
	}
	let (Some(column), Some(literal)) = (resolve_column(&args[0], filter_columns), resolve_literal(&args[1], lambda)) else {
		return;
	};
	let entry = acc.entry(column.to_string()).or_insert_with(BoundAcc::new);
	match name.as_str() {
		"equal?" | "equal??" => entry.merge_eq(literal),
		"<" => entry.merge_upper(literal, false),
		"<=" => entry.merge_upper(literal, true),
		">" => entry.merge_lower(literal, false),
		">=" => entry.merge_lower(literal, true),
		_ => {}
	}
}

/// Extract and canonicalize a BOUNDARY SET from `lambda`'s body over
/// `filter_columns` (the ordered column names the boundary analyzer should
/// consider; typically the lambda's own parameters).
pub fn extract(filter_columns: &[String], lambda: &Lambda) -> BoundarySet {
	let mut acc: HashMap<String, BoundAcc> = HashMap::new();
	walk(&lambda.body, filter_columns, lambda, &mut acc);

	let mut equalities = Vec::new();
	let mut ranges = Vec::new();
	for column in filter_columns {
		let Some(a) = acc.remove(column) else { continue };
		let mut bound = Bound::unbounded(column.clone());
		if let Some((v, incl)) = a.lower {
			bound.lower = Some(v);
			bound.lower_inclusive = incl;
		}
		if let Some((v, incl)) = a.upper {
			bound.upper = Some(v);
			bound.upper_inclusive = incl;
		}
		if bound.is_equality() {
			equalities.push(bound);
		} else if bound.lower.is_some() || bound.upper.is_some() {
			ranges.push(bound);
		}
	}
	equalities.sort_by(|a, b| a.column.cmp(&b.column));
	while ranges.len() > 1 {
		ranges.pop();
	}
	equalities.extend(ranges);
	BoundarySet { bounds: equalities }
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap as Captures;

	fn call(name: &str, args: Vec<Expr>) -> Expr {
		Expr::call(name, args)
	}

	#[test]
	fn equality_and_range_scenario() {
		// lambda(a, b, c) (and (equal? a 7) (and (>= b 3) (< b 10)))
		let body = call(
			"and",
			vec![
				call("equal?", vec![Expr::sym("a"), Expr::lit(Value::Int(7))]),
				call(
					"and",
					vec![
						call(">=", vec![Expr::sym("b"), Expr::lit(Value::Int(3))]),
						call("<", vec![Expr::sym("b"), Expr::lit(Value::Int(10))]),
					],
				),
			],
		);
		let lambda = Lambda::new(vec!["a".into(), "b".into(), "c".into()], body);
		let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
		let bset = extract(&columns, &lambda);

		assert_eq!(bset.bounds.len(), 2);
		assert_eq!(bset.bounds[0].column, "a");
		assert!(bset.bounds[0].is_equality());
		assert_eq!(bset.bounds[0].lower, Some(Value::Int(7)));

		assert_eq!(bset.bounds[1].column, "b");
		assert_eq!(bset.bounds[1].lower, Some(Value::Int(3)));
		assert!(bset.bounds[1].lower_inclusive);
		assert_eq!(bset.bounds[1].upper, Some(Value::Int(10)));
		assert!(!bset.bounds[1].upper_inclusive);

		// column c is unconstrained and does not appear at all
		assert!(bset.bounds.iter().all(|b| b.column != "c"));
	}

	#[test]
	fn multiple_predicates_on_same_column_intersect() {
		// (and (> x 3) (> x 5)) -> lower should be the tighter bound, 5
		let body = call(
			"and",
			vec![call(">", vec![Expr::sym("x"), Expr::lit(Value::Int(3))]), call(">", vec![Expr::sym("x"), Expr::lit(Value::Int(5))])],
		);
		let lambda = Lambda::new(vec!["x".into()], body);
		let bset = extract(&["x".to_string()], &lambda);
		assert_eq!(bset.bounds[0].lower, Some(Value::Int(5)));
		assert!(!bset.bounds[0].lower_inclusive);
	}

	#[test]
	fn tied_bounds_or_inclusivity() {
		// (and (>= x 5) (> x 5)) -> tie at 5, inclusivity ORed -> inclusive
		let body = call(
			"and",
			vec![call(">=", vec![Expr::sym("x"), Expr::lit(Value::Int(5))]), call(">", vec![Expr::sym("x"), Expr::lit(Value::Int(5))])],
		);
		let lambda = Lambda::new(vec!["x".into()], body);
		let bset = extract(&["x".to_string()], &lambda);
		assert_eq!(bset.bounds[0].lower, Some(Value::Int(5)));
		assert!(bset.bounds[0].lower_inclusive);
	}

	#[test]
	fn captured_outer_binding_resolves_as_literal() {
		let body = call("equal?", vec![Expr::sym("a"), Expr::sym("threshold")]);
		let mut captures = Captures::new();
		captures.insert("threshold".to_string(), Value::Int(42));
		let lambda = Lambda::new(vec!["a".into()], body).with_captures(captures);
		let bset = extract(&["a".to_string()], &lambda);
		assert_eq!(bset.bounds[0].lower, Some(Value::Int(42)));
	}

	#[test]
	fn unrecognized_forms_are_ignored_not_miscompiled() {
		let body = call("or", vec![call("equal?", vec![Expr::sym("a"), Expr::lit(Value::Int(1))]), Expr::lit(Value::Bool(true))]);
		let lambda = Lambda::new(vec!["a".into()], body);
		let bset = extract(&["a".to_string()], &lambda);
		assert!(bset.is_empty());
	}

	#[test]
	fn row_within_bounds_matches_correctness_predicate() {
		let body = call(
			"and",
			vec![call("equal?", vec![Expr::sym("a"), Expr::lit(Value::Int(7))]), call("<", vec![Expr::sym("b"), Expr::lit(Value::Int(10))])],
		);
		let lambda = Lambda::new(vec!["a".into(), "b".into()], body);
		let bset = extract(&["a".to_string(), "b".to_string()], &lambda);

		assert!(row_within_bounds(&[Value::Int(7), Value::Int(3)], &bset).is_within());
		assert!(!row_within_bounds(&[Value::Int(7), Value::Int(10)], &bset).is_within());
		assert_eq!(row_within_bounds(&[Value::Int(6), Value::Int(3)], &bset), Position::Before);
		assert_eq!(row_within_bounds(&[Value::Int(8), Value::Int(3)], &bset), Position::After);
	}
}
