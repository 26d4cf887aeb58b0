//! Kernel dispatch table.
//!
//! Kernels are keyed by operator kind and operand type classes. Each entry
//! declares whether the operator tolerates nulls (otherwise any null input
//! yields a null output row) and whether a device implementation exists.
//! Adding an operator means adding an [`OpKind`] variant and table entries.

use columnar_model::{
    can_cast, resolve_cast, CastOptions, CastPlan, Column, EngineError, LogicalType,
    NumericOptions, Result, TypeClass,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::aggregate::AggFunc;
use crate::arithmetic::{self, ArithOp};
use crate::cast;
use crate::compare::{self, CmpOp};
use crate::logical;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    Cast,
    Sum,
    Count,
    CountStar,
    Min,
    Max,
    Avg,
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
}

impl OpKind {
    pub const ALL: [OpKind; 29] = [
        OpKind::Add,
        OpKind::Subtract,
        OpKind::Multiply,
        OpKind::Divide,
        OpKind::Modulo,
        OpKind::Negate,
        OpKind::Eq,
        OpKind::NotEq,
        OpKind::Lt,
        OpKind::LtEq,
        OpKind::Gt,
        OpKind::GtEq,
        OpKind::And,
        OpKind::Or,
        OpKind::Not,
        OpKind::IsNull,
        OpKind::IsNotNull,
        OpKind::Cast,
        OpKind::Sum,
        OpKind::Count,
        OpKind::CountStar,
        OpKind::Min,
        OpKind::Max,
        OpKind::Avg,
        OpKind::RowNumber,
        OpKind::Rank,
        OpKind::DenseRank,
        OpKind::Lag,
        OpKind::Lead,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Subtract => "subtract",
            OpKind::Multiply => "multiply",
            OpKind::Divide => "divide",
            OpKind::Modulo => "modulo",
            OpKind::Negate => "negate",
            OpKind::Eq => "eq",
            OpKind::NotEq => "not-eq",
            OpKind::Lt => "lt",
            OpKind::LtEq => "lt-eq",
            OpKind::Gt => "gt",
            OpKind::GtEq => "gt-eq",
            OpKind::And => "and",
            OpKind::Or => "or",
            OpKind::Not => "not",
            OpKind::IsNull => "is-null",
            OpKind::IsNotNull => "is-not-null",
            OpKind::Cast => "cast",
            OpKind::Sum => "sum",
            OpKind::Count => "count",
            OpKind::CountStar => "count-star",
            OpKind::Min => "min",
            OpKind::Max => "max",
            OpKind::Avg => "avg",
            OpKind::RowNumber => "row-number",
            OpKind::Rank => "rank",
            OpKind::DenseRank => "dense-rank",
            OpKind::Lag => "lag",
            OpKind::Lead => "lead",
        }
    }

    /// Operators that see null inputs instead of short-circuiting to null.
    pub fn is_null_tolerant(self) -> bool {
        matches!(
            self,
            OpKind::And
                | OpKind::Or
                | OpKind::IsNull
                | OpKind::IsNotNull
                | OpKind::Count
                | OpKind::CountStar
                | OpKind::RowNumber
                | OpKind::Rank
                | OpKind::DenseRank
                | OpKind::Lag
                | OpKind::Lead
        )
    }

    pub fn arith(self) -> Option<ArithOp> {
        match self {
            OpKind::Add => Some(ArithOp::Add),
            OpKind::Subtract => Some(ArithOp::Sub),
            OpKind::Multiply => Some(ArithOp::Mul),
            OpKind::Divide => Some(ArithOp::Div),
            OpKind::Modulo => Some(ArithOp::Rem),
            _ => None,
        }
    }

    pub fn cmp(self) -> Option<CmpOp> {
        match self {
            OpKind::Eq => Some(CmpOp::Eq),
            OpKind::NotEq => Some(CmpOp::NotEq),
            OpKind::Lt => Some(CmpOp::Lt),
            OpKind::LtEq => Some(CmpOp::LtEq),
            OpKind::Gt => Some(CmpOp::Gt),
            OpKind::GtEq => Some(CmpOp::GtEq),
            _ => None,
        }
    }

    pub fn aggregate(self) -> Option<AggFunc> {
        match self {
            OpKind::Sum => Some(AggFunc::Sum),
            OpKind::Count => Some(AggFunc::Count),
            OpKind::CountStar => Some(AggFunc::CountStar),
            OpKind::Min => Some(AggFunc::Min),
            OpKind::Max => Some(AggFunc::Max),
            OpKind::Avg => Some(AggFunc::Avg),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        OpKind::ALL
            .iter()
            .copied()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown operator kind '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub op: OpKind,
    pub inputs: Vec<TypeClass>,
}

impl KernelKey {
    pub fn new(op: OpKind, inputs: impl Into<Vec<TypeClass>>) -> Self {
        Self {
            op,
            inputs: inputs.into(),
        }
    }

    pub fn for_types(op: OpKind, types: &[&LogicalType]) -> Self {
        Self::new(op, types.iter().map(|t| t.class()).collect::<Vec<_>>())
    }
}

/// Arguments handed to an elementwise kernel.
pub struct KernelArgs<'a> {
    pub inputs: &'a [&'a Column],
    pub output_type: &'a LogicalType,
    pub options: NumericOptions,
    /// Set for [`OpKind::Cast`].
    pub cast: Option<&'a CastPlan>,
}

pub type ScalarKernelFn = Arc<dyn Fn(&KernelArgs<'_>) -> Result<Column> + Send + Sync>;

#[derive(Clone)]
pub enum KernelImpl {
    /// Row-wise kernel over equally long (or broadcast) inputs.
    Scalar(ScalarKernelFn),
    /// Stateful reduction, driven by the aggregate operator.
    Aggregate(AggFunc),
    /// Partition-aware function, driven by the window evaluator.
    Window,
}

#[derive(Clone)]
pub struct KernelEntry {
    pub null_tolerant: bool,
    pub device: bool,
    pub kernel: KernelImpl,
}

impl fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kernel {
            KernelImpl::Scalar(_) => "scalar",
            KernelImpl::Aggregate(_) => "aggregate",
            KernelImpl::Window => "window",
        };
        f.debug_struct("KernelEntry")
            .field("null_tolerant", &self.null_tolerant)
            .field("device", &self.device)
            .field("kernel", &kind)
            .finish()
    }
}

/// Shared dispatch table; safe to extend while plans are being built.
#[derive(Default)]
pub struct KernelRegistry {
    entries: DashMap<KernelKey, KernelEntry>,
}

const FIXED_NUMERIC: [TypeClass; 4] = [
    TypeClass::Int32,
    TypeClass::Int64,
    TypeClass::Float64,
    TypeClass::Decimal,
];

const ORDERABLE: [TypeClass; 9] = [
    TypeClass::Boolean,
    TypeClass::Int32,
    TypeClass::Int64,
    TypeClass::Float64,
    TypeClass::Decimal,
    TypeClass::Date32,
    TypeClass::Timestamp,
    TypeClass::Utf8,
    TypeClass::Binary,
];

fn is_fixed(class: TypeClass) -> bool {
    class.example_type().is_fixed_width()
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in kernel.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        debug!("Kernel registry initialised with {} entries", registry.len());
        registry
    }

    pub fn register(&self, key: KernelKey, entry: KernelEntry) {
        self.entries.insert(key, entry);
    }

    pub fn lookup(&self, op: OpKind, inputs: &[TypeClass]) -> Option<KernelEntry> {
        self.entries
            .get(&KernelKey::new(op, inputs.to_vec()))
            .map(|e| e.value().clone())
    }

    pub fn lookup_types(&self, op: OpKind, types: &[&LogicalType]) -> Option<KernelEntry> {
        self.entries
            .get(&KernelKey::for_types(op, types))
            .map(|e| e.value().clone())
    }

    pub fn supports_device(&self, op: OpKind, inputs: &[TypeClass]) -> bool {
        self.lookup(op, inputs).is_some_and(|e| e.device)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<KernelKey> {
        let mut keys: Vec<KernelKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort_by(|a, b| (a.op, &a.inputs).cmp(&(b.op, &b.inputs)));
        keys
    }

    /// Run the scalar kernel registered for `op` over `args`.
    pub fn invoke(&self, op: OpKind, args: &KernelArgs<'_>) -> Result<Column> {
        let mut types: Vec<&LogicalType> = args.inputs.iter().map(|c| c.data_type()).collect();
        if let Some(plan) = args.cast {
            types.push(&plan.to);
        }
        let entry = self.lookup_types(op, &types).ok_or_else(|| {
            EngineError::UnsupportedOperation(format!("no kernel for {} over {:?}", op, types))
        })?;
        match entry.kernel {
            KernelImpl::Scalar(kernel) => kernel(args),
            _ => Err(EngineError::UnsupportedOperation(format!(
                "{} is not an elementwise operator",
                op
            ))),
        }
    }

    fn scalar(&self, op: OpKind, inputs: Vec<TypeClass>, device: bool, kernel: ScalarKernelFn) {
        self.register(
            KernelKey::new(op, inputs),
            KernelEntry {
                null_tolerant: op.is_null_tolerant(),
                device,
                kernel: KernelImpl::Scalar(kernel),
            },
        );
    }

    fn register_builtins(&self) {
        for op in [
            OpKind::Add,
            OpKind::Subtract,
            OpKind::Multiply,
            OpKind::Divide,
            OpKind::Modulo,
        ] {
            let arith = match op.arith() {
                Some(a) => a,
                None => continue,
            };
            for class in FIXED_NUMERIC {
                self.scalar(
                    op,
                    vec![class, class],
                    true,
                    Arc::new(move |args: &KernelArgs<'_>| {
                        arithmetic::binary(arith, args.inputs[0], args.inputs[1], args.output_type, &args.options)
                    }),
                );
            }
        }
        for class in FIXED_NUMERIC {
            self.scalar(
                OpKind::Negate,
                vec![class],
                true,
                Arc::new(|args: &KernelArgs<'_>| arithmetic::negate(args.inputs[0], &args.options)),
            );
        }

        for op in [
            OpKind::Eq,
            OpKind::NotEq,
            OpKind::Lt,
            OpKind::LtEq,
            OpKind::Gt,
            OpKind::GtEq,
        ] {
            let cmp = match op.cmp() {
                Some(c) => c,
                None => continue,
            };
            for class in ORDERABLE {
                self.scalar(
                    op,
                    vec![class, class],
                    is_fixed(class),
                    Arc::new(move |args: &KernelArgs<'_>| {
                        compare::compare(cmp, args.inputs[0], args.inputs[1])
                    }),
                );
            }
        }

        self.scalar(
            OpKind::And,
            vec![TypeClass::Boolean, TypeClass::Boolean],
            true,
            Arc::new(|args: &KernelArgs<'_>| logical::and_kleene(args.inputs[0], args.inputs[1])),
        );
        self.scalar(
            OpKind::Or,
            vec![TypeClass::Boolean, TypeClass::Boolean],
            true,
            Arc::new(|args: &KernelArgs<'_>| logical::or_kleene(args.inputs[0], args.inputs[1])),
        );
        self.scalar(
            OpKind::Not,
            vec![TypeClass::Boolean],
            true,
            Arc::new(|args: &KernelArgs<'_>| logical::not(args.inputs[0])),
        );
        for class in TypeClass::ALL {
            self.scalar(
                OpKind::IsNull,
                vec![class],
                is_fixed(class),
                Arc::new(|args: &KernelArgs<'_>| logical::is_null(args.inputs[0])),
            );
            self.scalar(
                OpKind::IsNotNull,
                vec![class],
                is_fixed(class),
                Arc::new(|args: &KernelArgs<'_>| logical::is_not_null(args.inputs[0])),
            );
        }

        for from in TypeClass::ALL {
            for to in TypeClass::ALL {
                let (from_type, to_type) = (from.example_type(), to.example_type());
                if !can_cast(&from_type, &to_type) {
                    continue;
                }
                let device = resolve_cast(&from_type, &to_type, CastOptions::default())
                    .is_ok_and(|p| p.is_device_capable());
                self.scalar(
                    OpKind::Cast,
                    vec![from, to],
                    device,
                    Arc::new(|args: &KernelArgs<'_>| {
                        let plan = args.cast.ok_or_else(|| {
                            EngineError::Internal("cast kernel invoked without a plan".into())
                        })?;
                        cast::cast(args.inputs[0], plan)
                    }),
                );
            }
        }

        for func in AggFunc::ALL {
            let op = func.op_kind();
            if func == AggFunc::CountStar {
                self.register(
                    KernelKey::new(op, Vec::new()),
                    KernelEntry {
                        null_tolerant: true,
                        device: true,
                        kernel: KernelImpl::Aggregate(func),
                    },
                );
                continue;
            }
            for class in TypeClass::ALL {
                if func.result_type(&class.example_type()).is_err() {
                    continue;
                }
                self.register(
                    KernelKey::new(op, vec![class]),
                    KernelEntry {
                        null_tolerant: op.is_null_tolerant(),
                        device: is_fixed(class),
                        kernel: KernelImpl::Aggregate(func),
                    },
                );
            }
        }

        for op in [OpKind::RowNumber, OpKind::Rank, OpKind::DenseRank] {
            self.register(
                KernelKey::new(op, Vec::new()),
                KernelEntry {
                    null_tolerant: true,
                    device: false,
                    kernel: KernelImpl::Window,
                },
            );
        }
        for op in [OpKind::Lag, OpKind::Lead] {
            for class in TypeClass::ALL {
                self.register(
                    KernelKey::new(op, vec![class]),
                    KernelEntry {
                        null_tolerant: true,
                        device: false,
                        kernel: KernelImpl::Window,
                    },
                );
            }
        }
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_kind_names_round_trip() {
        for op in OpKind::ALL {
            assert_eq!(op.name().parse::<OpKind>().unwrap(), op);
        }
        assert_eq!("IS_NULL".parse::<OpKind>().unwrap(), OpKind::IsNull);
        assert!("join".parse::<OpKind>().is_err());
    }

    #[test]
    fn builtin_capabilities() {
        let r = KernelRegistry::with_builtins();
        assert!(r.supports_device(OpKind::Add, &[TypeClass::Int64, TypeClass::Int64]));
        assert!(r.supports_device(OpKind::Add, &[TypeClass::Decimal, TypeClass::Decimal]));
        assert!(!r.supports_device(OpKind::Eq, &[TypeClass::Utf8, TypeClass::Utf8]));
        assert!(r.lookup(OpKind::Eq, &[TypeClass::Utf8, TypeClass::Utf8]).is_some());
        assert!(r.lookup(OpKind::Add, &[TypeClass::Utf8, TypeClass::Utf8]).is_none());
        assert!(r.supports_device(OpKind::Cast, &[TypeClass::Int32, TypeClass::Float64]));
        assert!(!r.supports_device(OpKind::Cast, &[TypeClass::Utf8, TypeClass::Int64]));
        assert!(r.lookup(OpKind::Sum, &[TypeClass::Utf8]).is_none());
        assert!(r.lookup(OpKind::Min, &[TypeClass::Utf8]).is_some());
        assert!(r.lookup(OpKind::CountStar, &[]).is_some());
        assert!(r.lookup(OpKind::IsNull, &[TypeClass::Map]).unwrap().null_tolerant);
    }

    #[test]
    fn invoke_and_register_custom() {
        let r = KernelRegistry::with_builtins();
        let a = Column::int64(vec![Some(1), None]);
        let b = Column::int64(vec![Some(2), Some(3)]);
        let out = r
            .invoke(
                OpKind::Add,
                &KernelArgs {
                    inputs: &[&a, &b],
                    output_type: &LogicalType::Int64,
                    options: NumericOptions::default(),
                    cast: None,
                },
            )
            .unwrap();
        assert_eq!(out.native_values::<i64>().unwrap()[0], 3);
        assert!(out.is_null(1));

        let before = r.len();
        r.register(
            KernelKey::new(OpKind::Add, vec![TypeClass::Utf8, TypeClass::Utf8]),
            KernelEntry {
                null_tolerant: false,
                device: false,
                kernel: KernelImpl::Scalar(Arc::new(|args: &KernelArgs<'_>| {
                    args.inputs[0].slice(0, args.inputs[0].len())
                })),
            },
        );
        assert_eq!(r.len(), before + 1);
        assert!(r.lookup(OpKind::Add, &[TypeClass::Utf8, TypeClass::Utf8]).is_some());
    }
}
