//! Logical expressions.
//!
//! [`Expr`] is a closed tagged variant. Types are not known here; the
//! planner resolves them bottom-up against an input schema before anything
//! is evaluated.

use columnar_model::{LogicalType, ScalarValue};
use gpu_kernels::{AggFunc, OpKind, SortOptions, WindowFunc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    pub fn op_kind(self) -> OpKind {
        match self {
            UnaryOp::Negate => OpKind::Negate,
            UnaryOp::Not => OpKind::Not,
            UnaryOp::IsNull => OpKind::IsNull,
            UnaryOp::IsNotNull => OpKind::IsNotNull,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn op_kind(self) -> OpKind {
        match self {
            BinaryOp::Add => OpKind::Add,
            BinaryOp::Subtract => OpKind::Subtract,
            BinaryOp::Multiply => OpKind::Multiply,
            BinaryOp::Divide => OpKind::Divide,
            BinaryOp::Modulo => OpKind::Modulo,
            BinaryOp::Eq => OpKind::Eq,
            BinaryOp::NotEq => OpKind::NotEq,
            BinaryOp::Lt => OpKind::Lt,
            BinaryOp::LtEq => OpKind::LtEq,
            BinaryOp::Gt => OpKind::Gt,
            BinaryOp::GtEq => OpKind::GtEq,
            BinaryOp::And => OpKind::And,
            BinaryOp::Or => OpKind::Or,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        self.op_kind().arith().is_some()
    }

    pub fn is_comparison(self) -> bool {
        self.op_kind().cmp().is_some()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnSelector {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowExpr {
    pub func: WindowFunc,
    pub input: Option<Expr>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<(Expr, SortOptions)>,
    /// Row distance for lag/lead.
    pub offset: usize,
    pub default: Option<ScalarValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A value with an optional explicit type. Untyped literals take the
    /// type implied by the value; an untyped null adopts its sibling's type.
    Literal {
        value: ScalarValue,
        data_type: Option<LogicalType>,
    },
    Column(ColumnSelector),
    Unary {
        op: UnaryOp,
        input: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast {
        input: Box<Expr>,
        to: LogicalType,
    },
    Aggregate {
        func: AggFunc,
        /// `None` only for `count(*)`.
        input: Option<Box<Expr>>,
    },
    Window(Box<WindowExpr>),
}

/// Reference a column by name.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(ColumnSelector::Name(name.into()))
}

/// Reference a column by position.
pub fn col_at(index: usize) -> Expr {
    Expr::Column(ColumnSelector::Index(index))
}

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal {
        value: value.into(),
        data_type: None,
    }
}

pub fn typed_lit(value: ScalarValue, data_type: LogicalType) -> Expr {
    Expr::Literal {
        value,
        data_type: Some(data_type),
    }
}

/// Decimal literal from its unscaled value.
pub fn lit_decimal(unscaled: i128, precision: u8, scale: u8) -> Expr {
    typed_lit(
        ScalarValue::Decimal(unscaled),
        LogicalType::Decimal { precision, scale },
    )
}

pub fn null_lit() -> Expr {
    lit(ScalarValue::Null)
}

fn agg(func: AggFunc, input: Expr) -> Expr {
    Expr::Aggregate {
        func,
        input: Some(Box::new(input)),
    }
}

pub fn sum(input: Expr) -> Expr {
    agg(AggFunc::Sum, input)
}

pub fn count(input: Expr) -> Expr {
    agg(AggFunc::Count, input)
}

pub fn count_star() -> Expr {
    Expr::Aggregate {
        func: AggFunc::CountStar,
        input: None,
    }
}

pub fn min(input: Expr) -> Expr {
    agg(AggFunc::Min, input)
}

pub fn max(input: Expr) -> Expr {
    agg(AggFunc::Max, input)
}

pub fn avg(input: Expr) -> Expr {
    agg(AggFunc::Avg, input)
}

fn window(func: WindowFunc, input: Option<Expr>, offset: usize, default: Option<ScalarValue>) -> Expr {
    Expr::Window(Box::new(WindowExpr {
        func,
        input,
        partition_by: Vec::new(),
        order_by: Vec::new(),
        offset,
        default,
    }))
}

pub fn row_number() -> Expr {
    window(WindowFunc::RowNumber, None, 0, None)
}

pub fn rank() -> Expr {
    window(WindowFunc::Rank, None, 0, None)
}

pub fn dense_rank() -> Expr {
    window(WindowFunc::DenseRank, None, 0, None)
}

pub fn lag(input: Expr, offset: usize, default: Option<ScalarValue>) -> Expr {
    window(WindowFunc::Lag, Some(input), offset, default)
}

pub fn lead(input: Expr, offset: usize, default: Option<ScalarValue>) -> Expr {
    window(WindowFunc::Lead, Some(input), offset, default)
}

impl Expr {
    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary {
            op,
            input: Box::new(self),
        }
    }

    pub fn add(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn mul(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn div(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn rem(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Modulo, other)
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn neg(self) -> Expr {
        self.unary(UnaryOp::Negate)
    }

    pub fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }

    pub fn is_null(self) -> Expr {
        self.unary(UnaryOp::IsNull)
    }

    pub fn is_not_null(self) -> Expr {
        self.unary(UnaryOp::IsNotNull)
    }

    pub fn cast(self, to: LogicalType) -> Expr {
        Expr::Cast {
            input: Box::new(self),
            to,
        }
    }

    /// Partition and order a window function. No-op for other expressions.
    pub fn over(self, partition_by: Vec<Expr>, order_by: Vec<(Expr, SortOptions)>) -> Expr {
        match self {
            Expr::Window(mut w) => {
                w.partition_by = partition_by;
                w.order_by = order_by;
                Expr::Window(w)
            }
            Expr::Aggregate { func, input } => Expr::Window(Box::new(WindowExpr {
                func: WindowFunc::Aggregate(func),
                input: input.map(|i| *i),
                partition_by,
                order_by,
                offset: 0,
                default: None,
            })),
            other => other,
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Literal { .. } | Expr::Column(_) | Expr::Window(_) => false,
            Expr::Unary { input, .. } | Expr::Cast { input, .. } => input.contains_aggregate(),
            Expr::Binary { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
        }
    }

    pub fn contains_window(&self) -> bool {
        match self {
            Expr::Window(_) => true,
            Expr::Literal { .. } | Expr::Column(_) => false,
            Expr::Aggregate { input, .. } => input.as_ref().is_some_and(|i| i.contains_window()),
            Expr::Unary { input, .. } | Expr::Cast { input, .. } => input.contains_window(),
            Expr::Binary { left, right, .. } => left.contains_window() || right.contains_window(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value, data_type } => match (value, data_type) {
                (ScalarValue::Utf8(s), _) => write!(f, "'{}'", s),
                (v, Some(t)) => f.write_str(&v.render(t)),
                (v, None) => f.write_str(&v.render(&LogicalType::Utf8)),
            },
            Expr::Column(ColumnSelector::Name(name)) => f.write_str(name),
            Expr::Column(ColumnSelector::Index(i)) => write!(f, "#{}", i),
            Expr::Unary { op, input } => match op {
                UnaryOp::Negate => write!(f, "(- {})", input),
                UnaryOp::Not => write!(f, "(NOT {})", input),
                UnaryOp::IsNull => write!(f, "({} IS NULL)", input),
                UnaryOp::IsNotNull => write!(f, "({} IS NOT NULL)", input),
            },
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Cast { input, to } => write!(f, "CAST({} AS {})", input, to),
            Expr::Aggregate { func, input } => match input {
                Some(i) => write!(f, "{}({})", func.op_kind(), i),
                None => f.write_str("count(*)"),
            },
            Expr::Window(w) => {
                match &w.input {
                    Some(i) => write!(f, "{}({})", w.func, i)?,
                    None => write!(f, "{}()", w.func)?,
                }
                f.write_str(" OVER (")?;
                if !w.partition_by.is_empty() {
                    let parts: Vec<String> = w.partition_by.iter().map(|e| e.to_string()).collect();
                    write!(f, "PARTITION BY {}", parts.join(", "))?;
                }
                if !w.order_by.is_empty() {
                    if !w.partition_by.is_empty() {
                        f.write_str(" ")?;
                    }
                    let parts: Vec<String> = w
                        .order_by
                        .iter()
                        .map(|(e, o)| format!("{}{}", e, if o.descending { " DESC" } else { "" }))
                        .collect();
                    write!(f, "ORDER BY {}", parts.join(", "))?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_and_display() {
        let e = col("a").add(col("b")).mul(lit(2i64)).gt(lit(10i64));
        assert_eq!(e.to_string(), "(((a + b) * 2) > 10)");
        assert!(!e.contains_aggregate());

        let s = sum(col("x").cast(LogicalType::Int64));
        assert_eq!(s.to_string(), "sum(CAST(x AS int64))");
        assert!(s.contains_aggregate());

        let w = rank().over(vec![col("g")], vec![(col("v"), SortOptions::desc())]);
        assert_eq!(w.to_string(), "rank() OVER (PARTITION BY g ORDER BY v DESC)");
        assert!(w.contains_window());

        let running = sum(col("v")).over(vec![], vec![(col("t"), SortOptions::asc())]);
        match running {
            Expr::Window(w) => assert_eq!(w.func, WindowFunc::Aggregate(AggFunc::Sum)),
            other => panic!("expected window, got {:?}", other),
        }
    }

    #[test]
    fn op_kinds() {
        assert_eq!(BinaryOp::Modulo.op_kind(), OpKind::Modulo);
        assert!(BinaryOp::Divide.is_arithmetic());
        assert!(BinaryOp::GtEq.is_comparison());
        assert!(!BinaryOp::And.is_comparison());
        assert_eq!(UnaryOp::IsNotNull.op_kind(), OpKind::IsNotNull);
        assert_eq!(lit_decimal(1234, 10, 2).to_string(), "12.34");
        assert_eq!(col_at(3).is_null().to_string(), "(#3 IS NULL)");
    }
}
