use crate::machine::machine_errors::EvalError;
use crate::parser::ast::*;

use ordered_float::OrderedFloat;

use std::cmp::Ordering;
use std::f64;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Number {
    Fixnum(i64),
    Float(OrderedFloat<f64>),
}

impl Number {
    #[inline]
    pub(crate) fn from_constant(c: &Constant) -> Option<Number> {
        match c {
            &Constant::Fixnum(n) => Some(Number::Fixnum(n)),
            &Constant::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn to_constant(self) -> Constant {
        match self {
            Number::Fixnum(n) => Constant::Fixnum(n),
            Number::Float(f) => Constant::Float(f),
        }
    }

    #[inline]
    fn as_f64(self) -> f64 {
        match self {
            Number::Fixnum(n) => n as f64,
            Number::Float(OrderedFloat(f)) => f,
        }
    }

    #[inline]
    pub(crate) fn is_zero(self) -> bool {
        match self {
            Number::Fixnum(n) => n == 0,
            Number::Float(OrderedFloat(f)) => f == 0.0,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_constant())
    }
}

/// Why an arithmetic operation has no result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ArithmeticError {
    Eval(EvalError),
    /// The operand should have been an integer.
    NotInteger(Number),
    /// The operand should have been a float.
    NotFloat(Number),
}

impl From<EvalError> for ArithmeticError {
    #[inline]
    fn from(err: EvalError) -> Self {
        ArithmeticError::Eval(err)
    }
}

pub(crate) type ArithResult = Result<Number, ArithmeticError>;

fn classify_float(f: f64) -> Result<f64, EvalError> {
    if f.is_nan() {
        Err(EvalError::Undefined)
    } else if f.is_infinite() {
        Err(EvalError::FloatOverflow)
    } else {
        Ok(f)
    }
}

#[inline]
fn float(f: f64) -> ArithResult {
    Ok(Number::Float(OrderedFloat(classify_float(f)?)))
}

#[inline]
fn int_overflow<T>(n: Option<T>) -> Result<T, ArithmeticError> {
    n.ok_or(ArithmeticError::Eval(EvalError::IntOverflow))
}

fn integer(n: Number) -> Result<i64, ArithmeticError> {
    match n {
        Number::Fixnum(n) => Ok(n),
        n => Err(ArithmeticError::NotInteger(n)),
    }
}

fn float_to_int(f: f64) -> ArithResult {
    let f = classify_float(f)?;

    if f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(Number::Fixnum(f as i64))
    } else {
        Err(ArithmeticError::Eval(EvalError::IntOverflow))
    }
}

pub(crate) fn add(n1: Number, n2: Number) -> ArithResult {
    match (n1, n2) {
        (Number::Fixnum(a), Number::Fixnum(b)) => Ok(Number::Fixnum(int_overflow(a.checked_add(b))?)),
        _ => float(n1.as_f64() + n2.as_f64()),
    }
}

pub(crate) fn sub(n1: Number, n2: Number) -> ArithResult {
    match (n1, n2) {
        (Number::Fixnum(a), Number::Fixnum(b)) => Ok(Number::Fixnum(int_overflow(a.checked_sub(b))?)),
        _ => float(n1.as_f64() - n2.as_f64()),
    }
}

pub(crate) fn mul(n1: Number, n2: Number) -> ArithResult {
    match (n1, n2) {
        (Number::Fixnum(a), Number::Fixnum(b)) => Ok(Number::Fixnum(int_overflow(a.checked_mul(b))?)),
        _ => float(n1.as_f64() * n2.as_f64()),
    }
}

pub(crate) fn neg(n: Number) -> ArithResult {
    match n {
        Number::Fixnum(a) => Ok(Number::Fixnum(int_overflow(a.checked_neg())?)),
        Number::Float(OrderedFloat(f)) => float(-f),
    }
}

pub(crate) fn abs(n: Number) -> ArithResult {
    match n {
        Number::Fixnum(a) => Ok(Number::Fixnum(int_overflow(a.checked_abs())?)),
        Number::Float(OrderedFloat(f)) => float(f.abs()),
    }
}

pub(crate) fn sign(n: Number) -> ArithResult {
    match n {
        Number::Fixnum(a) => Ok(Number::Fixnum(a.signum())),
        Number::Float(OrderedFloat(f)) if f == 0.0 => float(0.0),
        Number::Float(OrderedFloat(f)) => float(f.signum()),
    }
}

/// `/`: exact integer quotients stay integers.
pub(crate) fn div(n1: Number, n2: Number) -> ArithResult {
    if n2.is_zero() {
        return Err(EvalError::ZeroDivisor.into());
    }

    match (n1, n2) {
        (Number::Fixnum(a), Number::Fixnum(b)) if int_overflow(a.checked_rem(b))? == 0 => {
            Ok(Number::Fixnum(int_overflow(a.checked_div(b))?))
        }
        _ => float(n1.as_f64() / n2.as_f64()),
    }
}

pub(crate) fn idiv(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (integer(n1)?, integer(n2)?);

    if b == 0 {
        return Err(EvalError::ZeroDivisor.into());
    }

    Ok(Number::Fixnum(int_overflow(a.checked_div(b))?))
}

pub(crate) fn modulus(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (integer(n1)?, integer(n2)?);

    if b == 0 {
        return Err(EvalError::ZeroDivisor.into());
    }

    let m = int_overflow(a.checked_rem(b))?;

    // the result takes the sign of the divisor.
    if m != 0 && (m < 0) != (b < 0) {
        Ok(Number::Fixnum(m + b))
    } else {
        Ok(Number::Fixnum(m))
    }
}

pub(crate) fn remainder(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (integer(n1)?, integer(n2)?);

    if b == 0 {
        return Err(EvalError::ZeroDivisor.into());
    }

    Ok(Number::Fixnum(int_overflow(a.checked_rem(b))?))
}

pub(crate) fn compare(n1: Number, n2: Number) -> Ordering {
    match (n1, n2) {
        (Number::Fixnum(a), Number::Fixnum(b)) => a.cmp(&b),
        (Number::Float(a), Number::Float(b)) => a.cmp(&b),
        _ => {
            let (a, b) = (n1.as_f64(), n2.as_f64());
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

pub(crate) fn max(n1: Number, n2: Number) -> ArithResult {
    Ok(if compare(n1, n2) == Ordering::Less { n2 } else { n1 })
}

pub(crate) fn min(n1: Number, n2: Number) -> ArithResult {
    Ok(if compare(n1, n2) == Ordering::Greater { n2 } else { n1 })
}

/// `**`: integers raised to non-negative integer powers stay integers.
pub(crate) fn pow(n1: Number, n2: Number) -> ArithResult {
    match (n1, n2) {
        (Number::Fixnum(_), Number::Fixnum(b)) if b >= 0 => int_pow(n1, n2),
        _ => float_pow(n1, n2),
    }
}

fn float_pow(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (n1.as_f64(), n2.as_f64());

    if a == 0.0 && b < 0.0 {
        return Err(EvalError::ZeroDivisor.into());
    }

    float(a.powf(b))
}

/// `^`: integer exponentiation.
pub(crate) fn int_pow(n1: Number, n2: Number) -> ArithResult {
    if !matches!((n1, n2), (Number::Fixnum(_), Number::Fixnum(_))) {
        return float_pow(n1, n2);
    }

    let (a, b) = (integer(n1)?, integer(n2)?);

    if b < 0 {
        return match a {
            1 => Ok(Number::Fixnum(1)),
            -1 => Ok(Number::Fixnum(if b % 2 == 0 { 1 } else { -1 })),
            0 => Err(EvalError::ZeroDivisor.into()),
            _ => Err(ArithmeticError::NotFloat(n1)),
        };
    }

    let b = u32::try_from(b).map_err(|_| ArithmeticError::Eval(EvalError::IntOverflow))?;
    Ok(Number::Fixnum(int_overflow(a.checked_pow(b))?))
}

pub(crate) fn shl(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (integer(n1)?, integer(n2)?);

    if b < 0 {
        return shr(n1, Number::Fixnum(int_overflow(b.checked_neg())?));
    }

    if a == 0 {
        return Ok(Number::Fixnum(0));
    }

    if b >= 64 {
        return Err(EvalError::IntOverflow.into());
    }

    let wide = (a as i128) << b;

    i64::try_from(wide)
        .map(Number::Fixnum)
        .map_err(|_| ArithmeticError::Eval(EvalError::IntOverflow))
}

pub(crate) fn shr(n1: Number, n2: Number) -> ArithResult {
    let (a, b) = (integer(n1)?, integer(n2)?);

    if b < 0 {
        return shl(n1, Number::Fixnum(int_overflow(b.checked_neg())?));
    }

    Ok(Number::Fixnum(if b >= 64 {
        if a < 0 {
            -1
        } else {
            0
        }
    } else {
        a >> b
    }))
}

pub(crate) fn and(n1: Number, n2: Number) -> ArithResult {
    Ok(Number::Fixnum(integer(n1)? & integer(n2)?))
}

pub(crate) fn or(n1: Number, n2: Number) -> ArithResult {
    Ok(Number::Fixnum(integer(n1)? | integer(n2)?))
}

pub(crate) fn xor(n1: Number, n2: Number) -> ArithResult {
    Ok(Number::Fixnum(integer(n1)? ^ integer(n2)?))
}

pub(crate) fn bitwise_complement(n: Number) -> ArithResult {
    Ok(Number::Fixnum(!integer(n)?))
}

pub(crate) fn gcd(n1: Number, n2: Number) -> ArithResult {
    let (mut a, mut b) = (integer(n1)?, integer(n2)?);

    while b != 0 {
        let t = int_overflow(a.checked_rem(b))?;
        a = b;
        b = t;
    }

    Ok(Number::Fixnum(int_overflow(a.checked_abs())?))
}

pub(crate) fn sqrt(n: Number) -> ArithResult {
    let f = n.as_f64();

    if f < 0.0 {
        Err(EvalError::Undefined.into())
    } else {
        float(f.sqrt())
    }
}

pub(crate) fn log(n: Number) -> ArithResult {
    let f = n.as_f64();

    if f <= 0.0 {
        Err(EvalError::Undefined.into())
    } else {
        float(f.ln())
    }
}

pub(crate) fn unary_float_fn(n: Number, f: fn(f64) -> f64) -> ArithResult {
    float(f(n.as_f64()))
}

pub(crate) fn atan2(n1: Number, n2: Number) -> ArithResult {
    if n1.is_zero() && n2.is_zero() {
        return Err(EvalError::Undefined.into());
    }

    float(n1.as_f64().atan2(n2.as_f64()))
}

pub(crate) fn to_float(n: Number) -> ArithResult {
    float(n.as_f64())
}

pub(crate) fn float_integer_part(n: Number) -> ArithResult {
    float(n.as_f64().trunc())
}

pub(crate) fn float_fractional_part(n: Number) -> ArithResult {
    let f = n.as_f64();
    float(f - f.trunc())
}

fn rounding(n: Number, f: fn(f64) -> f64) -> ArithResult {
    match n {
        Number::Fixnum(_) => Ok(n),
        Number::Float(OrderedFloat(fl)) => float_to_int(f(fl)),
    }
}

pub(crate) fn floor(n: Number) -> ArithResult {
    rounding(n, f64::floor)
}

pub(crate) fn ceiling(n: Number) -> ArithResult {
    rounding(n, f64::ceil)
}

pub(crate) fn truncate(n: Number) -> ArithResult {
    rounding(n, f64::trunc)
}

pub(crate) fn round(n: Number) -> ArithResult {
    rounding(n, f64::round)
}

/// The value of an evaluable atom.
pub(crate) fn constant_value(name: &str) -> Option<Number> {
    Some(match name {
        "pi" => Number::Float(OrderedFloat(f64::consts::PI)),
        "e" => Number::Float(OrderedFloat(f64::consts::E)),
        "epsilon" => Number::Float(OrderedFloat(f64::EPSILON)),
        "max_tagged_integer" => Number::Fixnum(i64::MAX),
        "min_tagged_integer" => Number::Fixnum(i64::MIN),
        _ => return None,
    })
}

/// Applies an evaluable functor of arity one.
pub(crate) fn eval_unary(name: &str, n: Number) -> Option<ArithResult> {
    Some(match name {
        "-" => neg(n),
        "+" => Ok(n),
        "abs" => abs(n),
        "sign" => sign(n),
        "\\" => bitwise_complement(n),
        "sqrt" => sqrt(n),
        "sin" => unary_float_fn(n, f64::sin),
        "cos" => unary_float_fn(n, f64::cos),
        "tan" => unary_float_fn(n, f64::tan),
        "asin" => unary_float_fn(n, f64::asin),
        "acos" => unary_float_fn(n, f64::acos),
        "atan" => unary_float_fn(n, f64::atan),
        "exp" => unary_float_fn(n, f64::exp),
        "log" => log(n),
        "float" => to_float(n),
        "integer" => round(n),
        "truncate" => truncate(n),
        "round" => round(n),
        "ceiling" => ceiling(n),
        "floor" => floor(n),
        "float_integer_part" => float_integer_part(n),
        "float_fractional_part" => float_fractional_part(n),
        _ => return None,
    })
}

/// Applies an evaluable functor of arity two.
pub(crate) fn eval_binary(name: &str, n1: Number, n2: Number) -> Option<ArithResult> {
    Some(match name {
        "+" => add(n1, n2),
        "-" => sub(n1, n2),
        "*" => mul(n1, n2),
        "/" => div(n1, n2),
        "//" => idiv(n1, n2),
        "mod" => modulus(n1, n2),
        "rem" => remainder(n1, n2),
        "min" => min(n1, n2),
        "max" => max(n1, n2),
        "**" => pow(n1, n2),
        "^" => int_pow(n1, n2),
        ">>" => shr(n1, n2),
        "<<" => shl(n1, n2),
        "/\\" => and(n1, n2),
        "\\/" => or(n1, n2),
        "xor" => xor(n1, n2),
        "atan2" | "atan" => atan2(n1, n2),
        "gcd" => gcd(n1, n2),
        _ => return None,
    })
}

/// Is `name/arity` an evaluable functor?
pub(crate) fn is_evaluable(name: &str, arity: usize) -> bool {
    let sample = Number::Fixnum(1);

    match arity {
        0 => constant_value(name).is_some(),
        1 => eval_unary(name, sample).is_some(),
        2 => eval_binary(name, sample, sample).is_some(),
        _ => false,
    }
}
