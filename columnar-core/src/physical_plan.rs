//! Type resolution and physical expressions.
//!
//! The [`Planner`] turns an [`Expr`] into a [`PhysicalExpr`] against an
//! input schema. Everything the evaluator needs is decided here, once per
//! node: the output type (bottom-up, with explicit coercion casts inserted),
//! nullability, whether the subtree can raise a data-dependent error, the
//! offload placement, and a fused program for subtrees that lower
//! completely. Evaluation never infers types.

use columnar_model::{
    common_supertype, resolve_cast, CastOptions, CastPlan, EngineError, LogicalType,
    NumericOptions, OverflowPolicy, Result, Scalar, ScalarValue, Schema, TypeClass,
};
use gpu_kernels::arithmetic;
use gpu_kernels::{AggFunc, Instr, OpKind, Program, SortOptions, WindowFunc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::dispatcher::{OffloadDispatcher, Placement};
use crate::expr::{ColumnSelector, Expr, UnaryOp, WindowExpr};

#[derive(Debug, Clone)]
pub enum PhysicalNode {
    Literal(Arc<Scalar>),
    Column(usize),
    Unary {
        op: OpKind,
        input: Box<PhysicalExpr>,
    },
    Binary {
        op: OpKind,
        left: Box<PhysicalExpr>,
        right: Box<PhysicalExpr>,
    },
    Cast {
        input: Box<PhysicalExpr>,
        plan: CastPlan,
    },
    Aggregate {
        func: AggFunc,
        input: Option<Box<PhysicalExpr>>,
    },
    Window(Box<PhysicalWindow>),
}

#[derive(Debug, Clone)]
pub struct PhysicalWindow {
    pub func: WindowFunc,
    pub input: Option<PhysicalExpr>,
    pub partition_by: Vec<PhysicalExpr>,
    pub order_by: Vec<(PhysicalExpr, SortOptions)>,
    pub offset: usize,
    pub default: Option<ScalarValue>,
}

/// Single-pass program for a fully lowered subtree, reading the listed
/// input columns in order.
#[derive(Debug, Clone)]
pub struct FusedProgram {
    pub program: Arc<Program>,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PhysicalExpr {
    pub node: PhysicalNode,
    pub data_type: LogicalType,
    pub nullable: bool,
    /// The subtree can raise a data-dependent error, so it must be
    /// evaluated even when its result is unused.
    pub has_side_effects: bool,
    pub placement: Placement,
    pub fused: Option<FusedProgram>,
}

impl PhysicalExpr {
    fn leaf(node: PhysicalNode, data_type: LogicalType, nullable: bool) -> Self {
        Self {
            node,
            data_type,
            nullable,
            has_side_effects: false,
            placement: Placement::Gpu,
            fused: None,
        }
    }

    pub fn children(&self) -> Vec<&PhysicalExpr> {
        match &self.node {
            PhysicalNode::Literal(_) | PhysicalNode::Column(_) => Vec::new(),
            PhysicalNode::Unary { input, .. } | PhysicalNode::Cast { input, .. } => {
                vec![input.as_ref()]
            }
            PhysicalNode::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PhysicalNode::Aggregate { input, .. } => input.iter().map(|i| i.as_ref()).collect(),
            PhysicalNode::Window(w) => w
                .input
                .iter()
                .chain(&w.partition_by)
                .chain(w.order_by.iter().map(|(e, _)| e))
                .collect(),
        }
    }

    /// Pre-order walk over the subtree.
    pub fn visit(&self, f: &mut dyn FnMut(&PhysicalExpr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.node, PhysicalNode::Literal(_) | PhysicalNode::Column(_))
    }

    /// Operator kind of this node, `None` for leaves.
    pub fn op_kind(&self) -> Option<OpKind> {
        match &self.node {
            PhysicalNode::Literal(_) | PhysicalNode::Column(_) => None,
            PhysicalNode::Unary { op, .. } | PhysicalNode::Binary { op, .. } => Some(*op),
            PhysicalNode::Cast { .. } => Some(OpKind::Cast),
            PhysicalNode::Aggregate { func, .. } => Some(func.op_kind()),
            PhysicalNode::Window(w) => Some(w.func.op_kind()),
        }
    }

    fn operator_count(&self) -> usize {
        let own = usize::from(!self.is_leaf());
        own + self.children().iter().map(|c| c.operator_count()).sum::<usize>()
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self.node, PhysicalNode::Aggregate { .. })
            || self.children().iter().any(|c| c.contains_aggregate())
    }
}

impl fmt::Display for PhysicalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fused) = &self.fused {
            return write!(f, "fused[{}]", fused.program);
        }
        let p = self.placement;
        match &self.node {
            PhysicalNode::Literal(s) => write!(f, "{}", s),
            PhysicalNode::Column(i) => write!(f, "#{}", i),
            PhysicalNode::Unary { op, input } => write!(f, "{}@{}({})", op, p, input),
            PhysicalNode::Binary { op, left, right } => {
                write!(f, "{}@{}({}, {})", op, p, left, right)
            }
            PhysicalNode::Cast { input, plan } => write!(f, "cast@{}({} AS {})", p, input, plan.to),
            PhysicalNode::Aggregate { func, input } => match input {
                Some(i) => write!(f, "{}@{}({})", func, p, i),
                None => write!(f, "{}@{}(*)", func, p),
            },
            PhysicalNode::Window(w) => {
                match &w.input {
                    Some(i) => write!(f, "{}@{}({})", w.func, p, i)?,
                    None => write!(f, "{}@{}()", w.func, p)?,
                }
                write!(
                    f,
                    " over({} partitions, {} orderings)",
                    w.partition_by.len(),
                    w.order_by.len()
                )
            }
        }
    }
}

/// A planned aggregate for the aggregate operator.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub name: String,
    pub func: AggFunc,
    pub input: Option<PhysicalExpr>,
    pub input_type: LogicalType,
    pub output_type: LogicalType,
    pub placement: Placement,
}

/// Type implied by an untyped literal, if any.
pub fn literal_type(value: &ScalarValue) -> Option<LogicalType> {
    match value {
        ScalarValue::Boolean(_) => Some(LogicalType::Boolean),
        ScalarValue::Int32(_) => Some(LogicalType::Int32),
        ScalarValue::Int64(_) => Some(LogicalType::Int64),
        ScalarValue::Float64(_) => Some(LogicalType::Float64),
        ScalarValue::Date32(_) => Some(LogicalType::Date32),
        ScalarValue::Timestamp(_) => Some(LogicalType::Timestamp),
        ScalarValue::Utf8(_) => Some(LogicalType::Utf8),
        ScalarValue::Binary(_) => Some(LogicalType::Binary),
        _ => None,
    }
}

fn is_untyped_null(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal {
            value: ScalarValue::Null,
            data_type: None
        }
    )
}

/// How data-dependent errors of one node surface.
#[derive(Debug, Clone, Copy, Default)]
struct DataErrors {
    raises: bool,
    nulls: bool,
}

pub struct Planner<'a> {
    dispatcher: &'a OffloadDispatcher,
    numeric: NumericOptions,
}

impl<'a> Planner<'a> {
    pub fn new(dispatcher: &'a OffloadDispatcher, numeric: NumericOptions) -> Self {
        Self { dispatcher, numeric }
    }

    pub fn plan(&self, expr: &Expr, schema: &Schema) -> Result<PhysicalExpr> {
        let planned = self.resolve(expr, schema, None)?;
        debug!("Planned {} as {}", expr, planned);
        Ok(planned)
    }

    /// Plan a top-level aggregate call for the aggregate operator.
    pub fn plan_aggregate(&self, name: &str, expr: &Expr, schema: &Schema) -> Result<AggregateSpec> {
        let planned = self.plan(expr, schema)?;
        match planned.node {
            PhysicalNode::Aggregate { func, input } => {
                let input_type = input
                    .as_ref()
                    .map_or(LogicalType::Int64, |i| i.data_type.clone());
                Ok(AggregateSpec {
                    name: name.to_string(),
                    func,
                    input: input.map(|i| *i),
                    input_type,
                    output_type: planned.data_type,
                    placement: planned.placement,
                })
            }
            _ => Err(EngineError::InvalidArgument(format!(
                "{} is not an aggregate call",
                expr
            ))),
        }
    }

    fn resolve(&self, expr: &Expr, schema: &Schema, hint: Option<&LogicalType>) -> Result<PhysicalExpr> {
        match expr {
            Expr::Literal { value, data_type } => {
                let data_type = data_type
                    .clone()
                    .or_else(|| literal_type(value))
                    .or_else(|| hint.cloned())
                    .ok_or_else(|| {
                        EngineError::TypeMismatch(format!("cannot infer the type of literal {:?}", value))
                    })?;
                let scalar = Scalar::new(data_type.clone(), value.clone())?;
                Ok(PhysicalExpr::leaf(
                    PhysicalNode::Literal(Arc::new(scalar)),
                    data_type,
                    value.is_null(),
                ))
            }
            Expr::Column(selector) => {
                let index = match selector {
                    ColumnSelector::Index(i) => *i,
                    ColumnSelector::Name(name) => schema.index_of(name)?,
                };
                let field = schema.field(index).ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "column index {} out of range ({} columns)",
                        index,
                        schema.len()
                    ))
                })?;
                Ok(PhysicalExpr::leaf(
                    PhysicalNode::Column(index),
                    field.data_type.clone(),
                    field.nullable,
                ))
            }
            Expr::Unary { op, input } => {
                let input = self.resolve(input, schema, None)?;
                self.unary(*op, input)
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = if is_untyped_null(left) {
                    let r = self.resolve(right, schema, None)?;
                    let l = self.resolve(left, schema, Some(&r.data_type))?;
                    (l, r)
                } else {
                    let l = self.resolve(left, schema, None)?;
                    let r = self.resolve(right, schema, Some(&l.data_type))?;
                    (l, r)
                };
                self.binary(op.op_kind(), l, r)
            }
            Expr::Cast { input, to } => {
                let input = self.resolve(input, schema, Some(to))?;
                self.cast(input, to)
            }
            Expr::Aggregate { func, input } => {
                let input = match input {
                    Some(i) if i.contains_aggregate() => {
                        return Err(EngineError::InvalidArgument(format!(
                            "nested aggregate in {}",
                            expr
                        )))
                    }
                    Some(i) => Some(self.resolve(i, schema, None)?),
                    None if *func == AggFunc::CountStar => None,
                    None => {
                        return Err(EngineError::InvalidArgument(format!(
                            "{} needs an input",
                            func
                        )))
                    }
                };
                self.aggregate(*func, input)
            }
            Expr::Window(w) => self.window(w, schema),
        }
    }

    fn data_errors(&self, op: OpKind, operand: &LogicalType, out: &LogicalType) -> DataErrors {
        let fallible = match op {
            OpKind::Divide | OpKind::Modulo => true,
            OpKind::Add | OpKind::Subtract | OpKind::Multiply | OpKind::Negate | OpKind::Sum => {
                !matches!(operand, LogicalType::Float64)
            }
            OpKind::Avg => matches!(operand, LogicalType::Decimal { .. }),
            _ => false,
        };
        if !fallible {
            return DataErrors::default();
        }
        let overflow_fails = self.numeric.overflow_policy(out) == OverflowPolicy::Fail;
        match op {
            OpKind::Divide | OpKind::Modulo => DataErrors {
                raises: self.numeric.strict_arithmetic || overflow_fails,
                nulls: !self.numeric.strict_arithmetic || !overflow_fails,
            },
            _ => DataErrors {
                raises: overflow_fails,
                nulls: !overflow_fails,
            },
        }
    }

    fn operator(
        &self,
        op: OpKind,
        node: PhysicalNode,
        classes: &[TypeClass],
        data_type: LogicalType,
        nullable: bool,
        errors: DataErrors,
    ) -> Result<PhysicalExpr> {
        let placement = self.dispatcher.decide(op, classes)?;
        let mut expr = PhysicalExpr {
            node,
            data_type,
            nullable: nullable || errors.nulls,
            has_side_effects: errors.raises,
            placement,
            fused: None,
        };
        expr.has_side_effects |= expr.children().iter().any(|c| c.has_side_effects);
        expr.fused = fuse(&expr);
        Ok(expr)
    }

    fn unary(&self, op: UnaryOp, input: PhysicalExpr) -> Result<PhysicalExpr> {
        let kind = op.op_kind();
        let input_type = input.data_type.clone();
        let (data_type, nullable) = match op {
            UnaryOp::Negate if input_type.is_numeric() => (input_type.clone(), input.nullable),
            UnaryOp::Not if input_type == LogicalType::Boolean => (LogicalType::Boolean, input.nullable),
            UnaryOp::IsNull | UnaryOp::IsNotNull => (LogicalType::Boolean, false),
            _ => {
                return Err(EngineError::TypeMismatch(format!(
                    "{} is not defined for {}",
                    kind, input_type
                )))
            }
        };
        let errors = self.data_errors(kind, &input_type, &data_type);
        self.operator(
            kind,
            PhysicalNode::Unary {
                op: kind,
                input: Box::new(input),
            },
            &[input_type.class()],
            data_type,
            nullable,
            errors,
        )
    }

    fn binary(&self, op: OpKind, left: PhysicalExpr, right: PhysicalExpr) -> Result<PhysicalExpr> {
        let (left, right, data_type) = if let Some(arith) = op.arith() {
            if !left.data_type.is_numeric() || !right.data_type.is_numeric() {
                return Err(EngineError::TypeMismatch(format!(
                    "{} is not defined for {} and {}",
                    op, left.data_type, right.data_type
                )));
            }
            let (l, r) = if left.data_type.class() == right.data_type.class() {
                (left, right)
            } else {
                self.coerce_pair(op, left, right)?
            };
            let out = arithmetic::result_type(arith, &l.data_type, &r.data_type)?;
            (l, r, out)
        } else if op.cmp().is_some() {
            let (l, r) = if left.data_type == right.data_type {
                (left, right)
            } else {
                self.coerce_pair(op, left, right)?
            };
            (l, r, LogicalType::Boolean)
        } else {
            if left.data_type != LogicalType::Boolean || right.data_type != LogicalType::Boolean {
                return Err(EngineError::TypeMismatch(format!(
                    "{} needs boolean operands, got {} and {}",
                    op, left.data_type, right.data_type
                )));
            }
            (left, right, LogicalType::Boolean)
        };

        let errors = self.data_errors(op, &left.data_type, &data_type);
        let classes = [left.data_type.class(), right.data_type.class()];
        let nullable = left.nullable || right.nullable;
        self.operator(
            op,
            PhysicalNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            &classes,
            data_type,
            nullable,
            errors,
        )
    }

    fn coerce_pair(
        &self,
        op: OpKind,
        left: PhysicalExpr,
        right: PhysicalExpr,
    ) -> Result<(PhysicalExpr, PhysicalExpr)> {
        let target = common_supertype(&left.data_type, &right.data_type).ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "{} between {} and {} has no common type",
                op, left.data_type, right.data_type
            ))
        })?;
        trace!("Coercing {} operands to {}", op, target);
        Ok((self.cast(left, &target)?, self.cast(right, &target)?))
    }

    fn cast(&self, input: PhysicalExpr, to: &LogicalType) -> Result<PhysicalExpr> {
        if &input.data_type == to {
            return Ok(input);
        }
        let overflow = self.numeric.overflow_policy(to);
        let plan = resolve_cast(&input.data_type, to, CastOptions::new(overflow))?;
        let errors = if plan.lossless {
            DataErrors::default()
        } else {
            DataErrors {
                raises: plan.overflow == OverflowPolicy::Fail,
                nulls: true,
            }
        };
        let classes = [input.data_type.class(), to.class()];
        let nullable = input.nullable;
        self.operator(
            OpKind::Cast,
            PhysicalNode::Cast {
                input: Box::new(input),
                plan,
            },
            &classes,
            to.clone(),
            nullable,
            errors,
        )
    }

    fn aggregate(&self, func: AggFunc, input: Option<PhysicalExpr>) -> Result<PhysicalExpr> {
        let input_type = input
            .as_ref()
            .map_or(LogicalType::Int64, |i| i.data_type.clone());
        let data_type = func.result_type(&input_type)?;
        let classes: Vec<TypeClass> = input.iter().map(|i| i.data_type.class()).collect();
        let nullable = !matches!(func, AggFunc::Count | AggFunc::CountStar);
        let errors = self.data_errors(func.op_kind(), &input_type, &data_type);
        self.operator(
            func.op_kind(),
            PhysicalNode::Aggregate {
                func,
                input: input.map(Box::new),
            },
            &classes,
            data_type,
            nullable,
            errors,
        )
    }

    fn window(&self, w: &WindowExpr, schema: &Schema) -> Result<PhysicalExpr> {
        let input = match &w.input {
            Some(_) if !w.func.takes_input() => {
                return Err(EngineError::InvalidArgument(format!("{} takes no input", w.func)))
            }
            Some(i) => Some(self.resolve(i, schema, None)?),
            None => None,
        };
        let partition_by = w
            .partition_by
            .iter()
            .map(|e| self.resolve(e, schema, None))
            .collect::<Result<Vec<_>>>()?;
        let order_by = w
            .order_by
            .iter()
            .map(|(e, o)| self.resolve(e, schema, None).map(|p| (p, *o)))
            .collect::<Result<Vec<_>>>()?;

        let input_type = input.as_ref().map(|i| i.data_type.clone());
        let data_type = w.func.result_type(input_type.as_ref())?;
        if let Some(default) = &w.default {
            Scalar::new(data_type.clone(), default.clone())?;
        }
        let classes: Vec<TypeClass> = input.iter().map(|i| i.data_type.class()).collect();
        let nullable = !matches!(
            w.func,
            WindowFunc::RowNumber
                | WindowFunc::Rank
                | WindowFunc::DenseRank
                | WindowFunc::Aggregate(AggFunc::Count | AggFunc::CountStar)
        );
        let errors = match (w.func, &input_type) {
            (WindowFunc::Aggregate(f), Some(t)) => self.data_errors(f.op_kind(), t, &data_type),
            _ => DataErrors::default(),
        };
        self.operator(
            w.func.op_kind(),
            PhysicalNode::Window(Box::new(PhysicalWindow {
                func: w.func,
                input,
                partition_by,
                order_by,
                offset: w.offset,
                default: w.default.clone(),
            })),
            &classes,
            data_type,
            nullable,
            errors,
        )
    }
}

#[derive(Default)]
struct Lowering {
    instrs: Vec<Instr>,
    columns: Vec<usize>,
    types: Vec<LogicalType>,
}

impl Lowering {
    /// Append the postfix form of `expr`. Any node outside the fusable
    /// subset, or placed on the host, aborts the whole lowering.
    fn lower(&mut self, expr: &PhysicalExpr) -> bool {
        if !expr.is_leaf() && expr.placement != Placement::Gpu {
            return false;
        }
        match &expr.node {
            PhysicalNode::Column(index) => {
                let slot = match self.columns.iter().position(|c| c == index) {
                    Some(slot) => slot,
                    None => {
                        self.columns.push(*index);
                        self.types.push(expr.data_type.clone());
                        self.columns.len() - 1
                    }
                };
                self.instrs.push(Instr::Column(slot));
                true
            }
            PhysicalNode::Literal(scalar) => match scalar.value() {
                Ok(v) => {
                    self.instrs
                        .push(Instr::Literal(v.clone(), expr.data_type.clone()));
                    true
                }
                Err(_) => false,
            },
            PhysicalNode::Unary {
                op: OpKind::Negate,
                input,
            } => {
                if !self.lower(input) {
                    return false;
                }
                self.instrs.push(Instr::Neg);
                true
            }
            PhysicalNode::Binary { op, left, right } => {
                let instr = match (op.arith(), OpKind::cmp(*op)) {
                    (Some(a), _) => Instr::Arith(a),
                    (None, Some(c)) => Instr::Compare(c),
                    _ => return false,
                };
                if !self.lower(left) || !self.lower(right) {
                    return false;
                }
                self.instrs.push(instr);
                true
            }
            PhysicalNode::Cast { input, plan } => {
                if !self.lower(input) {
                    return false;
                }
                self.instrs.push(Instr::Cast(plan.clone()));
                true
            }
            _ => false,
        }
    }
}

/// Fused program for `expr` when the whole subtree (of at least two
/// operators) lowers and type-checks; `None` otherwise.
fn fuse(expr: &PhysicalExpr) -> Option<FusedProgram> {
    if expr.operator_count() < 2 {
        return None;
    }
    let mut lowering = Lowering::default();
    if !lowering.lower(expr) {
        return None;
    }
    match Program::new(lowering.instrs, &lowering.types) {
        Ok(program) => {
            trace!("Fused subtree into [{}]", program);
            Some(FusedProgram {
                program: Arc::new(program),
                columns: lowering.columns,
            })
        }
        Err(e) => {
            trace!("Subtree not fused: {}", e);
            None
        }
    }
}
