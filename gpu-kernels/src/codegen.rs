//! Fused postfix programs.
//!
//! A restricted class of expressions (column references, literals, integer
//! and float arithmetic, comparisons, casts among fixed-width types) is
//! lowered into a flat postfix instruction list and evaluated row by row in
//! a single pass, without materialising intermediate columns.
//!
//! Programs are type-checked when built; anything outside the subset is
//! rejected there so callers can fall back to tree evaluation.

use columnar_model::{
    CastPlan, Column, EngineError, LogicalType, NumericOptions, Result, ScalarValue,
};
use std::fmt;
use tracing::trace;

use crate::arithmetic::{arith_scalar, negate_scalar, ArithOp};
use crate::compare::CmpOp;
use crate::kernel_io::{output_len, place_values, resolve, row};
use crate::sort::compare_values;

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push input column `i`.
    Column(usize),
    Literal(ScalarValue, LogicalType),
    Arith(ArithOp),
    Neg,
    Compare(CmpOp),
    Cast(CastPlan),
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Column(i) => write!(f, "#{}", i),
            Instr::Literal(v, t) => write!(f, "{}", v.render(t)),
            Instr::Arith(op) => write!(f, "{}", op),
            Instr::Neg => f.write_str("neg"),
            Instr::Compare(op) => write!(f, "{}", op),
            Instr::Cast(plan) => write!(f, "::{}", plan.to),
        }
    }
}

fn fusable_arith(t: &LogicalType) -> bool {
    matches!(t, LogicalType::Int32 | LogicalType::Int64 | LogicalType::Float64)
}

fn fusable_value(t: &LogicalType) -> bool {
    t.is_fixed_width()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    instrs: Vec<Instr>,
    /// Result type of each instruction.
    types: Vec<LogicalType>,
    input_types: Vec<LogicalType>,
    max_depth: usize,
}

fn reject(msg: String) -> EngineError {
    EngineError::UnsupportedOperation(format!("not fusable: {}", msg))
}

impl Program {
    /// Type-check `instrs` against the input column types.
    pub fn new(instrs: Vec<Instr>, input_types: &[LogicalType]) -> Result<Self> {
        let mut stack: Vec<LogicalType> = Vec::new();
        let mut types = Vec::with_capacity(instrs.len());
        let mut max_depth = 0;
        for instr in &instrs {
            let pushed = match instr {
                Instr::Column(i) => {
                    let t = input_types
                        .get(*i)
                        .ok_or_else(|| reject(format!("column #{} out of range", i)))?;
                    if !fusable_value(t) {
                        return Err(reject(format!("column of type {}", t)));
                    }
                    t.clone()
                }
                Instr::Literal(v, t) => {
                    if !fusable_value(t) || !v.conforms_to(t) {
                        return Err(reject(format!("literal {:?} of type {}", v, t)));
                    }
                    t.clone()
                }
                Instr::Arith(op) => {
                    let (l, r) = pop2(&mut stack)?;
                    if l != r || !fusable_arith(&l) {
                        return Err(reject(format!("{} {} {}", l, op, r)));
                    }
                    l
                }
                Instr::Neg => {
                    let t = stack.pop().ok_or_else(|| reject("stack underflow".into()))?;
                    if !fusable_arith(&t) {
                        return Err(reject(format!("negate {}", t)));
                    }
                    t
                }
                Instr::Compare(op) => {
                    let (l, r) = pop2(&mut stack)?;
                    if l != r {
                        return Err(reject(format!("{} {} {}", l, op, r)));
                    }
                    LogicalType::Boolean
                }
                Instr::Cast(plan) => {
                    let t = stack.pop().ok_or_else(|| reject("stack underflow".into()))?;
                    if t != plan.from || !plan.is_device_capable() {
                        return Err(reject(format!("cast {} to {}", t, plan.to)));
                    }
                    plan.to.clone()
                }
            };
            stack.push(pushed.clone());
            types.push(pushed);
            max_depth = max_depth.max(stack.len());
        }
        if stack.len() != 1 {
            return Err(reject(format!("program leaves {} values", stack.len())));
        }
        Ok(Self {
            instrs,
            types,
            input_types: input_types.to_vec(),
            max_depth,
        })
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn output_type(&self) -> &LogicalType {
        // Programs are never empty: `new` requires exactly one result.
        &self.types[self.types.len() - 1]
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Evaluate over `columns` (typed as at construction) in one pass.
    pub fn execute(&self, columns: &[&Column], options: &NumericOptions) -> Result<Column> {
        if columns.len() != self.input_types.len()
            || columns
                .iter()
                .zip(&self.input_types)
                .any(|(c, t)| c.data_type() != t)
        {
            return Err(EngineError::TypeMismatch(
                "program inputs do not match their declared types".into(),
            ));
        }
        let len = if columns.is_empty() { 1 } else { output_len(columns)? };
        let decoded = columns
            .iter()
            .map(|c| c.values())
            .collect::<Result<Vec<_>>>()?;
        trace!("Executing fused program [{}] over {} rows", self, len);

        let mut out = Vec::with_capacity(len);
        let mut stack: Vec<ScalarValue> = Vec::with_capacity(self.max_depth);
        for i in 0..len {
            stack.clear();
            for (instr, result_type) in self.instrs.iter().zip(&self.types) {
                let value = match instr {
                    Instr::Column(c) => decoded[*c][row(columns[*c], i)].clone(),
                    Instr::Literal(v, _) => v.clone(),
                    Instr::Arith(op) => {
                        let (a, b) = pop_values(&mut stack)?;
                        match arith_scalar(*op, &a, &b) {
                            Ok(v) => v,
                            Err(e) => resolve::<ScalarValue>(options, result_type, e)?
                                .unwrap_or(ScalarValue::Null),
                        }
                    }
                    Instr::Neg => {
                        let a = stack.pop().unwrap_or(ScalarValue::Null);
                        match negate_scalar(&a) {
                            Ok(v) => v,
                            Err(e) => resolve::<ScalarValue>(options, result_type, e)?
                                .unwrap_or(ScalarValue::Null),
                        }
                    }
                    Instr::Compare(op) => {
                        let (a, b) = pop_values(&mut stack)?;
                        compare_scalar(*op, &a, &b)
                    }
                    Instr::Cast(plan) => {
                        let a = stack.pop().unwrap_or(ScalarValue::Null);
                        plan.apply_value(&a)?
                    }
                };
                stack.push(value);
            }
            out.push(stack.pop().unwrap_or(ScalarValue::Null));
        }
        place_values(columns, self.output_type().clone(), &out)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instrs.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", instr)?;
        }
        Ok(())
    }
}

fn pop2(stack: &mut Vec<LogicalType>) -> Result<(LogicalType, LogicalType)> {
    let r = stack.pop();
    let l = stack.pop();
    match (l, r) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(reject("stack underflow".into())),
    }
}

fn pop_values(stack: &mut Vec<ScalarValue>) -> Result<(ScalarValue, ScalarValue)> {
    let r = stack.pop();
    let l = stack.pop();
    match (l, r) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(EngineError::Internal("fused program stack underflow".into())),
    }
}

/// Null-propagating comparison with IEEE float semantics.
pub fn compare_scalar(op: CmpOp, a: &ScalarValue, b: &ScalarValue) -> ScalarValue {
    let ordering = match (a, b) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => return ScalarValue::Null,
        (ScalarValue::Float64(x), ScalarValue::Float64(y)) => x.partial_cmp(y),
        (x, y) => Some(compare_values(x, y)),
    };
    ScalarValue::Boolean(op.holds(ordering))
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::{resolve_cast, CastOptions};

    #[test]
    fn fused_arithmetic_and_compare() {
        // (a + b) * 2 > 10
        let program = Program::new(
            vec![
                Instr::Column(0),
                Instr::Column(1),
                Instr::Arith(ArithOp::Add),
                Instr::Literal(ScalarValue::Int64(2), LogicalType::Int64),
                Instr::Arith(ArithOp::Mul),
                Instr::Literal(ScalarValue::Int64(10), LogicalType::Int64),
                Instr::Compare(CmpOp::Gt),
            ],
            &[LogicalType::Int64, LogicalType::Int64],
        )
        .unwrap();
        assert_eq!(program.output_type(), &LogicalType::Boolean);
        assert_eq!(program.max_depth(), 2);
        assert_eq!(program.to_string(), "#0 #1 + 2 * 10 >");

        let a = Column::int64(vec![Some(1), Some(4), None]);
        let b = Column::int64(vec![Some(2), Some(3), Some(1)]);
        let out = program.execute(&[&a, &b], &NumericOptions::default()).unwrap();
        assert_eq!(
            out.values().unwrap(),
            vec![ScalarValue::Boolean(false), ScalarValue::Boolean(true), ScalarValue::Null]
        );
    }

    #[test]
    fn cast_inside_program() {
        let plan = resolve_cast(&LogicalType::Int32, &LogicalType::Float64, CastOptions::default()).unwrap();
        let program = Program::new(
            vec![
                Instr::Column(0),
                Instr::Cast(plan),
                Instr::Literal(ScalarValue::Float64(0.5), LogicalType::Float64),
                Instr::Arith(ArithOp::Div),
            ],
            &[LogicalType::Int32],
        )
        .unwrap();
        let out = program
            .execute(&[&Column::int32(vec![Some(3), Some(-1)])], &NumericOptions::default())
            .unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Float64(6.0), ScalarValue::Float64(-2.0)]);
    }

    #[test]
    fn rejects_outside_subset() {
        let dec = LogicalType::decimal(10, 2).unwrap();
        assert!(Program::new(
            vec![Instr::Column(0), Instr::Column(0), Instr::Arith(ArithOp::Add)],
            &[dec]
        )
        .is_err());
        assert!(Program::new(vec![Instr::Column(0)], &[LogicalType::Utf8]).is_err());
        assert!(Program::new(
            vec![Instr::Column(0), Instr::Column(1)],
            &[LogicalType::Int64, LogicalType::Int64]
        )
        .is_err());
        assert!(Program::new(vec![Instr::Arith(ArithOp::Add)], &[]).is_err());
    }

    #[test]
    fn data_errors_follow_options() {
        let program = Program::new(
            vec![
                Instr::Column(0),
                Instr::Literal(ScalarValue::Int32(0), LogicalType::Int32),
                Instr::Arith(ArithOp::Div),
            ],
            &[LogicalType::Int32],
        )
        .unwrap();
        let col = Column::int32(vec![Some(1)]);
        let out = program.execute(&[&col], &NumericOptions::permissive()).unwrap();
        assert_eq!(out.value(0).unwrap(), ScalarValue::Null);
        assert_eq!(
            program.execute(&[&col], &NumericOptions::strict()).unwrap_err(),
            EngineError::DivideByZero
        );
    }
}
