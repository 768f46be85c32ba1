use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use pl_core::{ElementType, Scalar};

pub(crate) type ArrayResult<T> = Result<T, String>;

/// Largest element count a script may allocate in one array.
pub const MAX_ARRAY_LEN: usize = 1 << 27;

/// Validity token shared by every view created for one chunk. Revoking it
/// turns all further element access into an error.
#[derive(Debug)]
pub(crate) struct ViewLease {
    live: Cell<bool>,
}

impl ViewLease {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            live: Cell::new(true),
        })
    }

    pub(crate) fn revoke(&self) {
        self.live.set(false);
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }
}

#[derive(Debug, Clone)]
enum Storage {
    View {
        lease: Rc<ViewLease>,
        base: NonNull<u8>,
        stride: usize,
    },
    Owned(Rc<RefCell<Vec<u8>>>),
}

/// One-dimensional numeric array handed to scripts.
///
/// A view aliases a column of a bound point buffer; an owned array is
/// allocated by the script itself. Clones share storage.
#[derive(Debug, Clone)]
pub struct TypedArray {
    element_type: ElementType,
    len: usize,
    storage: Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Operand<'a> {
    Array(&'a TypedArray),
    Float(f64),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKind {
    Float,
    Signed,
    Unsigned,
    // Integer literals adopt the signedness of the array they meet.
    Weak,
}

impl TypedArray {
    /// # Safety
    ///
    /// For as long as `lease` is live, `base + i * stride` must point to
    /// `element_type.width()` readable and writable bytes for every
    /// `i < len`, and nothing else may access those bytes.
    pub(crate) unsafe fn view(
        lease: Rc<ViewLease>,
        base: NonNull<u8>,
        stride: usize,
        len: usize,
        element_type: ElementType,
    ) -> Self {
        Self {
            element_type,
            len,
            storage: Storage::View {
                lease,
                base,
                stride,
            },
        }
    }

    pub fn zeroed(element_type: ElementType, len: usize) -> ArrayResult<Self> {
        if len > MAX_ARRAY_LEN {
            return Err(format!(
                "Array length {} exceeds the limit of {} elements.",
                len, MAX_ARRAY_LEN
            ));
        }
        Ok(Self {
            element_type,
            len,
            storage: Storage::Owned(Rc::new(RefCell::new(vec![0u8; len * element_type.width()]))),
        })
    }

    pub fn from_scalars(element_type: ElementType, values: &[Scalar]) -> Self {
        let width = element_type.width();
        let mut data = vec![0u8; values.len() * width];
        for (chunk, value) in data.chunks_exact_mut(width).zip(values) {
            element_type.encode(*value, chunk);
        }
        Self {
            element_type,
            len: values.len(),
            storage: Storage::Owned(Rc::new(RefCell::new(data))),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View { .. })
    }

    /// False once the chunk a view belongs to has been unbound.
    pub fn is_live(&self) -> bool {
        match &self.storage {
            Storage::View { lease, .. } => lease.is_live(),
            Storage::Owned(_) => true,
        }
    }

    pub fn shares_storage(&self, other: &TypedArray) -> bool {
        match (&self.storage, &other.storage) {
            (
                Storage::View {
                    lease: left_lease,
                    base: left_base,
                    ..
                },
                Storage::View {
                    lease: right_lease,
                    base: right_base,
                    ..
                },
            ) => Rc::ptr_eq(left_lease, right_lease) && left_base == right_base,
            (Storage::Owned(left), Storage::Owned(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }

    /// Resolves a script index; negative values count from the end.
    pub fn resolve_index(&self, index: i64) -> ArrayResult<usize> {
        let len = self.len as i64;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return Err(format!(
                "Index {} is out of bounds for an array of {} elements.",
                index, self.len
            ));
        }
        Ok(resolved as usize)
    }

    pub fn get(&self, index: usize) -> ArrayResult<Scalar> {
        self.check_index(index)?;
        let width = self.element_type.width();
        match &self.storage {
            Storage::View {
                lease,
                base,
                stride,
            } => {
                if !lease.is_live() {
                    return Err(released_view_message());
                }
                // SAFETY: the lease is live, so the buffer behind `base` is
                // still exclusively borrowed by the bound chunk, and
                // `index < len` keeps the element inside the buffer.
                let bytes = unsafe {
                    std::slice::from_raw_parts(base.as_ptr().add(index * stride), width)
                };
                Ok(self.element_type.decode(bytes))
            }
            Storage::Owned(data) => {
                let data = data.borrow();
                let start = index * width;
                Ok(self.element_type.decode(&data[start..start + width]))
            }
        }
    }

    pub fn set(&self, index: usize, value: Scalar) -> ArrayResult<()> {
        self.check_index(index)?;
        let width = self.element_type.width();
        match &self.storage {
            Storage::View {
                lease,
                base,
                stride,
            } => {
                if !lease.is_live() {
                    return Err(released_view_message());
                }
                // SAFETY: same argument as in `get`; no other slice over
                // this element exists while the write happens.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(base.as_ptr().add(index * stride), width)
                };
                self.element_type.encode(value, bytes);
                Ok(())
            }
            Storage::Owned(data) => {
                let mut data = data.borrow_mut();
                let start = index * width;
                self.element_type
                    .encode(value, &mut data[start..start + width]);
                Ok(())
            }
        }
    }

    pub fn to_scalars(&self) -> ArrayResult<Vec<Scalar>> {
        (0..self.len).map(|index| self.get(index)).collect()
    }

    pub fn astype(&self, element_type: ElementType) -> ArrayResult<TypedArray> {
        Ok(Self::from_scalars(element_type, &self.to_scalars()?))
    }

    pub fn sum(&self) -> ArrayResult<f64> {
        Ok(self.to_scalars()?.iter().map(|value| value.as_f64()).sum())
    }

    pub fn mean(&self) -> ArrayResult<f64> {
        if self.is_empty() {
            return Err("Cannot take the mean of an empty array.".to_string());
        }
        Ok(self.sum()? / self.len as f64)
    }

    pub fn min(&self) -> ArrayResult<f64> {
        self.fold_extreme(f64::min)
    }

    pub fn max(&self) -> ArrayResult<f64> {
        self.fold_extreme(f64::max)
    }

    fn fold_extreme(&self, pick: fn(f64, f64) -> f64) -> ArrayResult<f64> {
        self.to_scalars()?
            .into_iter()
            .map(Scalar::as_f64)
            .reduce(pick)
            .ok_or_else(|| "Cannot reduce an empty array.".to_string())
    }

    fn check_index(&self, index: usize) -> ArrayResult<()> {
        if index >= self.len {
            return Err(format!(
                "Index {} is out of bounds for an array of {} elements.",
                index, self.len
            ));
        }
        Ok(())
    }
}

impl fmt::Display for TypedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = match self.to_scalars() {
            Ok(values) => values,
            Err(_) => return write!(f, "<released {} view>", self.element_type),
        };
        write!(f, "[")?;
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            match value {
                Scalar::Int(value) => write!(f, "{}", value)?,
                Scalar::UInt(value) => write!(f, "{}", value)?,
                Scalar::Float(value) => write!(f, "{:?}", value)?,
            }
        }
        write!(f, "] ({})", self.element_type)
    }
}

fn released_view_message() -> String {
    "Array view was released when its chunk was unbound.".to_string()
}

impl Operand<'_> {
    fn kind(&self) -> NumberKind {
        match self {
            Operand::Array(array) if array.element_type().is_float() => NumberKind::Float,
            Operand::Array(array) if array.element_type().is_unsigned() => NumberKind::Unsigned,
            Operand::Array(_) => NumberKind::Signed,
            Operand::Float(_) => NumberKind::Float,
            Operand::Int(_) => NumberKind::Weak,
        }
    }

    fn len(&self) -> Option<usize> {
        match self {
            Operand::Array(array) => Some(array.len()),
            _ => None,
        }
    }

    fn at(&self, index: usize) -> ArrayResult<Scalar> {
        match self {
            Operand::Array(array) => array.get(index),
            Operand::Float(value) => Ok(Scalar::Float(*value)),
            Operand::Int(value) => Ok(Scalar::Int(*value)),
        }
    }
}

fn promote(lhs: NumberKind, rhs: NumberKind, op: ArithOp) -> ElementType {
    if op == ArithOp::Div || lhs == NumberKind::Float || rhs == NumberKind::Float {
        return ElementType::Float64;
    }
    match (lhs, rhs) {
        (NumberKind::Unsigned, NumberKind::Unsigned)
        | (NumberKind::Unsigned, NumberKind::Weak)
        | (NumberKind::Weak, NumberKind::Unsigned) => ElementType::UInt64,
        _ => ElementType::Int64,
    }
}

/// Element-wise arithmetic; at least one operand must be an array.
pub(crate) fn elementwise(
    lhs: Operand<'_>,
    rhs: Operand<'_>,
    op: ArithOp,
) -> ArrayResult<TypedArray> {
    let len = match (lhs.len(), rhs.len()) {
        (Some(left), Some(right)) if left != right => {
            return Err(format!(
                "Cannot combine arrays of {} and {} elements.",
                left, right
            ))
        }
        (Some(len), _) | (None, Some(len)) => len,
        (None, None) => return Err("Element-wise arithmetic needs an array operand.".to_string()),
    };

    let element_type = promote(lhs.kind(), rhs.kind(), op);
    let mut values = Vec::with_capacity(len);
    for index in 0..len {
        let left = lhs.at(index)?;
        let right = rhs.at(index)?;
        let value = match element_type {
            ElementType::Float64 => Scalar::Float(apply_f64(left.as_f64(), right.as_f64(), op)),
            ElementType::UInt64 => Scalar::UInt(apply_u64(left.as_u64(), right.as_u64(), op)),
            _ => Scalar::Int(apply_i64(left.as_i64(), right.as_i64(), op)),
        };
        values.push(value);
    }
    Ok(TypedArray::from_scalars(element_type, &values))
}

fn apply_f64(left: f64, right: f64, op: ArithOp) -> f64 {
    match op {
        ArithOp::Add => left + right,
        ArithOp::Sub => left - right,
        ArithOp::Mul => left * right,
        ArithOp::Div => left / right,
    }
}

// Division never reaches the integer paths: it always promotes to float64.
fn apply_i64(left: i64, right: i64, op: ArithOp) -> i64 {
    match op {
        ArithOp::Add => left.wrapping_add(right),
        ArithOp::Sub => left.wrapping_sub(right),
        ArithOp::Mul | ArithOp::Div => left.wrapping_mul(right),
    }
}

fn apply_u64(left: u64, right: u64, op: ArithOp) -> u64 {
    match op {
        ArithOp::Add => left.wrapping_add(right),
        ArithOp::Sub => left.wrapping_sub(right),
        ArithOp::Mul | ArithOp::Div => left.wrapping_mul(right),
    }
}
