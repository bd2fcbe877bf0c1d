//! Built-in operators, functions and constants.
//!
//! Built-ins form a closed set: each is a [`Builtin`] variant with a fixed
//! arity, so the interpreter loop dispatches on an enum instead of a string.
//! Several names may map to the same variant (`ln` and `log`, `sgn` and
//! `sign`, ...). Variadic operations from the original catalogue are collapsed
//! to fixed arities (`min`, `min3`, `min4`).

use crate::special;
use std::f64::consts::{E, PI, SQRT_2, TAU};
use thiserror::Error;

/// A numeric failure raised by a single operation.
///
/// These never abort a batch: the evaluator turns them into NaN for the one
/// sample that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NumericError {
    #[error("math domain error in '{0}'")]
    Domain(&'static str),
    #[error("numerical result out of range in '{0}'")]
    Overflow(&'static str),
}

/// Families of built-ins that are registered together.
///
/// `Core` is always present; the other groups are pulled in lazily when one
/// of their names shows up in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionGroup {
    Core,
    Math,
    Other,
    Probability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    // Operators
    Add,
    Pos,
    Sub,
    Neg,
    Mul,
    Div,
    Pow,
    // Core functions
    Abs,
    Min,
    Min3,
    Min4,
    Max,
    Max3,
    Max4,
    // Math
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Atan2,
    Cosh,
    Sinh,
    Tanh,
    Acosh,
    Asinh,
    Atanh,
    Sqrt,
    Cbrt,
    Ceil,
    Floor,
    Degrees,
    Radians,
    Erf,
    Erfc,
    Exp,
    Expm1,
    Log,
    Log10,
    Log1p,
    Log2,
    Gamma,
    Lgamma,
    Fmod,
    Remainder,
    Hypot,
    Dist,
    Copysign,
    Trunc,
    // Other
    Relu,
    LeakyRelu,
    Sigmoid,
    Sign,
    Lerp,
    Lerpt,
    Heaviside,
    Rect,
    Triangle,
    Sawtooth,
    SquareWave,
    TriangleWave,
    If,
    Ifn,
    Ifz,
    In,
    Out,
    // Probability
    NormPdf,
    NormCdf,
    UnitNormPdf,
    UnitNormCdf,
    TrianglePdf,
    TriangleCdf,
    UniformPdf,
    UniformCdf,
    ExponPdf,
    ExponCdf,
    CauchyPdf,
    CauchyCdf,
    StudentPdf,
    BetaPdf,
    Chi2Pdf,
    GammaPdf,
}

/// Every recognised spelling. The first entry of a variant is its canonical
/// name.
const NAMES: &[(&str, Builtin)] = &[
    ("+", Builtin::Add),
    ("+u", Builtin::Pos),
    ("-", Builtin::Sub),
    ("-u", Builtin::Neg),
    ("*", Builtin::Mul),
    ("/", Builtin::Div),
    ("^", Builtin::Pow),
    ("abs", Builtin::Abs),
    ("min", Builtin::Min),
    ("min3", Builtin::Min3),
    ("min4", Builtin::Min4),
    ("max", Builtin::Max),
    ("max3", Builtin::Max3),
    ("max4", Builtin::Max4),
    ("cos", Builtin::Cos),
    ("sin", Builtin::Sin),
    ("tan", Builtin::Tan),
    ("acos", Builtin::Acos),
    ("asin", Builtin::Asin),
    ("atan", Builtin::Atan),
    ("atan2", Builtin::Atan2),
    ("cosh", Builtin::Cosh),
    ("sinh", Builtin::Sinh),
    ("tanh", Builtin::Tanh),
    ("acosh", Builtin::Acosh),
    ("asinh", Builtin::Asinh),
    ("atanh", Builtin::Atanh),
    ("sqrt", Builtin::Sqrt),
    ("cbrt", Builtin::Cbrt),
    ("ceil", Builtin::Ceil),
    ("floor", Builtin::Floor),
    ("degrees", Builtin::Degrees),
    ("radians", Builtin::Radians),
    ("erf", Builtin::Erf),
    ("erfc", Builtin::Erfc),
    ("exp", Builtin::Exp),
    ("expm1", Builtin::Expm1),
    ("log", Builtin::Log),
    ("ln", Builtin::Log),
    ("log10", Builtin::Log10),
    ("log1p", Builtin::Log1p),
    ("log2", Builtin::Log2),
    ("gamma", Builtin::Gamma),
    ("lgamma", Builtin::Lgamma),
    ("lngamma", Builtin::Lgamma),
    ("fmod", Builtin::Fmod),
    ("remainder", Builtin::Remainder),
    ("hypot", Builtin::Hypot),
    ("dist", Builtin::Dist),
    ("copysign", Builtin::Copysign),
    ("trunc", Builtin::Trunc),
    ("relu", Builtin::Relu),
    ("ramp", Builtin::Relu),
    ("lrelu", Builtin::LeakyRelu),
    ("sigmoid", Builtin::Sigmoid),
    ("sigm", Builtin::Sigmoid),
    ("sign", Builtin::Sign),
    ("sgn", Builtin::Sign),
    ("lerp", Builtin::Lerp),
    ("lerpt", Builtin::Lerpt),
    ("heaviside", Builtin::Heaviside),
    ("rect", Builtin::Rect),
    ("triangle", Builtin::Triangle),
    ("tri", Builtin::Triangle),
    ("sawtooth", Builtin::Sawtooth),
    ("squarewave", Builtin::SquareWave),
    ("sqwave", Builtin::SquareWave),
    ("trianglewave", Builtin::TriangleWave),
    ("triwave", Builtin::TriangleWave),
    ("if", Builtin::If),
    ("ifn", Builtin::Ifn),
    ("ifz", Builtin::Ifz),
    ("in", Builtin::In),
    ("out", Builtin::Out),
    ("normpdf", Builtin::NormPdf),
    ("normcdf", Builtin::NormCdf),
    ("unormpdf", Builtin::UnitNormPdf),
    ("unormcdf", Builtin::UnitNormCdf),
    ("tripdf", Builtin::TrianglePdf),
    ("tricdf", Builtin::TriangleCdf),
    ("uniformpdf", Builtin::UniformPdf),
    ("uniformcdf", Builtin::UniformCdf),
    ("exppdf", Builtin::ExponPdf),
    ("expcdf", Builtin::ExponCdf),
    ("cauchypdf", Builtin::CauchyPdf),
    ("cauchycdf", Builtin::CauchyCdf),
    ("studentpdf", Builtin::StudentPdf),
    ("betapdf", Builtin::BetaPdf),
    ("chi2pdf", Builtin::Chi2Pdf),
    ("khi2pdf", Builtin::Chi2Pdf),
    ("gammapdf", Builtin::GammaPdf),
];

/// Mathematical and physical constants (SI units), registered as arity-0
/// entries.
pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", PI),
    ("tau", TAU),
    ("e", E),
    ("ga", 0.577_215_664_901_532_9),
    ("em", 0.577_215_664_901_532_9),
    ("phi", 1.618_033_988_749_895),
    ("sqrt2", SQRT_2),
    ("catalan", 0.915_965_594_177_219),
    ("apery", 1.202_056_903_159_594),
    ("khinchin", 2.685_452_001_065_306_2),
    ("glaisher", 1.282_427_129_100_622_6),
    ("mertens", 0.261_497_212_847_642_77),
    ("brun", 1.902_160_583_104),
    ("feigenbaumd", 4.669_201_609_102_990_67),
    ("feigenbauma", 2.502_907_875_095_892_82),
    ("nan", f64::NAN),
    ("_", f64::NAN),
    ("inf", f64::INFINITY),
    ("G", 6.674_3e-11),
    ("g", 9.806_65),
    ("c", 299_792_458.0),
    ("h", 6.626_070_15e-34),
    ("hb", 1.054_571_817e-34),
    ("mu0", 1.256_637_062_12e-6),
    ("Z0", 376.730_313_668),
    ("epsilon0", 8.854_187_812_8e-12),
    ("eps0", 8.854_187_812_8e-12),
    ("ke", 8.987_551_792_3e9),
    ("kB", 1.380_649e-23),
    ("sigma", 5.670_374_419e-8),
    ("ec", 1.602_176_634e-19),
    ("alpha", 7.297_352_569_3e-3),
    ("me", 9.109_383_701_5e-31),
    ("mp", 1.672_621_923_69e-27),
    ("mn", 1.674_927_498_04e-27),
    ("muB", 9.274_010_078_3e-24),
    ("muN", 5.050_783_746_1e-27),
    ("a0", 5.291_772_109_03e-11),
    ("Rinf", 1.097_373_156_816e7),
    ("F", 9.648_533_212_331_002e4),
    ("NA", 6.022_140_76e23),
    ("R", 8.314_462_618_153_24),
];

impl Builtin {
    /// Resolves a token to a built-in, aliases included.
    pub fn from_name(name: &str) -> Option<Builtin> {
        NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|&(_, builtin)| builtin)
    }

    /// All spellings of every built-in of a group.
    pub fn names_in(group: FunctionGroup) -> impl Iterator<Item = (&'static str, Builtin)> {
        NAMES
            .iter()
            .copied()
            .filter(move |(_, builtin)| builtin.group() == group)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|&(name, _)| name)
            .unwrap_or("?")
    }

    pub fn arity(self) -> usize {
        use Builtin::*;
        match self {
            Pos | Neg | Abs => 1,
            Add | Sub | Mul | Div | Pow | Min | Max => 2,
            Min3 | Max3 => 3,
            Min4 | Max4 => 4,
            Atan2 | Fmod | Remainder | Hypot | Copysign => 2,
            Dist => 4,
            Cos | Sin | Tan | Acos | Asin | Atan | Cosh | Sinh | Tanh | Acosh | Asinh
            | Atanh | Sqrt | Cbrt | Ceil | Floor | Degrees | Radians | Erf | Erfc | Exp
            | Expm1 | Log | Log10 | Log1p | Log2 | Gamma | Lgamma | Trunc => 1,
            Relu | Sigmoid | Sign | Heaviside | Rect | Triangle | Sawtooth | SquareWave
            | TriangleWave => 1,
            LeakyRelu => 2,
            Lerpt | If | Ifn | Ifz => 3,
            Lerp | In | Out => 5,
            UnitNormPdf | UnitNormCdf => 1,
            ExponPdf | ExponCdf | StudentPdf | Chi2Pdf => 2,
            NormPdf | NormCdf | UniformPdf | UniformCdf | CauchyPdf | CauchyCdf | BetaPdf
            | GammaPdf => 3,
            TrianglePdf | TriangleCdf => 4,
        }
    }

    pub fn group(self) -> FunctionGroup {
        use Builtin::*;
        match self {
            Add | Pos | Sub | Neg | Mul | Div | Pow | Abs | Min | Min3 | Min4 | Max | Max3
            | Max4 => FunctionGroup::Core,
            Relu | LeakyRelu | Sigmoid | Sign | Lerp | Lerpt | Heaviside | Rect | Triangle
            | Sawtooth | SquareWave | TriangleWave | If | Ifn | Ifz | In | Out => {
                FunctionGroup::Other
            }
            NormPdf | NormCdf | UnitNormPdf | UnitNormCdf | TrianglePdf | TriangleCdf
            | UniformPdf | UniformCdf | ExponPdf | ExponCdf | CauchyPdf | CauchyCdf
            | StudentPdf | BetaPdf | Chi2Pdf | GammaPdf => FunctionGroup::Probability,
            _ => FunctionGroup::Math,
        }
    }

    /// Applies the operation to exactly `self.arity()` operands, in stack
    /// order (deepest first).
    ///
    /// Finite operands that produce a non-finite result are reported as a
    /// numeric error; non-finite operands propagate silently.
    pub fn apply(self, args: &[f64]) -> Result<f64, NumericError> {
        debug_assert_eq!(args.len(), self.arity());
        if self == Builtin::Div && args[1] == 0.0 {
            return Err(NumericError::Domain(self.name()));
        }
        let value = self.compute(args);
        if !value.is_finite() && args.iter().all(|a| a.is_finite()) {
            return Err(if value.is_nan() {
                NumericError::Domain(self.name())
            } else {
                NumericError::Overflow(self.name())
            });
        }
        Ok(value)
    }

    fn compute(self, a: &[f64]) -> f64 {
        use Builtin::*;
        match self {
            Add => a[0] + a[1],
            Pos => a[0],
            Sub => a[0] - a[1],
            Neg => -a[0],
            Mul => a[0] * a[1],
            Div => a[0] / a[1],
            Pow => a[0].powf(a[1]),
            Abs => a[0].abs(),
            Min | Min3 | Min4 => a[1..].iter().fold(a[0], |m, &v| if v < m { v } else { m }),
            Max | Max3 | Max4 => a[1..].iter().fold(a[0], |m, &v| if v > m { v } else { m }),
            Cos => a[0].cos(),
            Sin => a[0].sin(),
            Tan => a[0].tan(),
            Acos => a[0].acos(),
            Asin => a[0].asin(),
            Atan => a[0].atan(),
            Atan2 => a[0].atan2(a[1]),
            Cosh => a[0].cosh(),
            Sinh => a[0].sinh(),
            Tanh => a[0].tanh(),
            Acosh => a[0].acosh(),
            Asinh => a[0].asinh(),
            Atanh => a[0].atanh(),
            Sqrt => a[0].sqrt(),
            Cbrt => a[0].cbrt(),
            Ceil => a[0].ceil(),
            Floor => a[0].floor(),
            Degrees => a[0].to_degrees(),
            Radians => a[0].to_radians(),
            Erf => special::erf(a[0]),
            Erfc => special::erfc(a[0]),
            Exp => a[0].exp(),
            Expm1 => a[0].exp_m1(),
            Log => positive(a[0]).ln(),
            Log10 => positive(a[0]).log10(),
            Log1p => {
                if a[0] <= -1.0 {
                    f64::NAN
                } else {
                    a[0].ln_1p()
                }
            }
            Log2 => positive(a[0]).log2(),
            Gamma => special::gamma(a[0]),
            Lgamma => special::ln_gamma(a[0]),
            Fmod => a[0] % a[1],
            Remainder => a[0] - (a[0] / a[1]).round_ties_even() * a[1],
            Hypot => a[0].hypot(a[1]),
            Dist => (a[2] - a[0]).hypot(a[3] - a[1]),
            Copysign => a[0].copysign(a[1]),
            Trunc => a[0].trunc(),
            Relu => {
                if a[0] > 0.0 {
                    a[0]
                } else {
                    0.0
                }
            }
            LeakyRelu => {
                if a[0] > 0.0 {
                    a[0]
                } else {
                    a[1] * a[0]
                }
            }
            Sigmoid => 1.0 / (1.0 + (-a[0]).exp()),
            Sign => {
                if a[0] < 0.0 {
                    -1.0
                } else if a[0] > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Lerp => a[3] + (a[0] - a[1]) / (a[2] - a[1]) * (a[4] - a[3]),
            Lerpt => a[1] + a[0] * (a[2] - a[1]),
            Heaviside => {
                if a[0] < 0.0 {
                    0.0
                } else if a[0] > 0.0 {
                    1.0
                } else {
                    0.5
                }
            }
            Rect => {
                if a[0] < -0.5 || a[0] > 0.5 {
                    0.0
                } else {
                    1.0
                }
            }
            Triangle => {
                if a[0] < -1.0 || a[0] > 1.0 {
                    0.0
                } else {
                    1.0 - a[0].abs()
                }
            }
            Sawtooth => a[0] - a[0].floor(),
            SquareWave => {
                if a[0] - a[0].floor() < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            TriangleWave => 4.0 * (a[0] - a[0].floor() - 0.5).abs() - 1.0,
            If => pick(a[0] >= 0.0, a[1], a[2]),
            Ifn => pick(a[0] <= 0.0, a[1], a[2]),
            Ifz => pick(a[0] == 0.0, a[1], a[2]),
            In => pick(a[1] <= a[0] && a[0] <= a[2], a[3], a[4]),
            Out => pick(a[1] <= a[0] && a[0] <= a[2], a[4], a[3]),
            NormPdf => {
                let z = (a[0] - a[1]) / a[2];
                (-0.5 * z * z).exp() / (a[2] * (2.0 * PI).sqrt())
            }
            NormCdf => 0.5 * (1.0 + special::erf((a[0] - a[1]) / (a[2] * SQRT_2))),
            UnitNormPdf => (-0.5 * a[0] * a[0]).exp() / (2.0 * PI).sqrt(),
            UnitNormCdf => 0.5 * (1.0 + special::erf(a[0] / SQRT_2)),
            TrianglePdf => triangle_pdf(a[0], a[1], a[2], a[3]),
            TriangleCdf => triangle_cdf(a[0], a[1], a[2], a[3]),
            UniformPdf => {
                if a[1] <= a[0] && a[0] <= a[2] {
                    1.0 / (a[2] - a[1])
                } else {
                    0.0
                }
            }
            UniformCdf => {
                if a[0] < a[1] {
                    0.0
                } else if a[0] > a[2] {
                    1.0
                } else {
                    (a[0] - a[1]) / (a[2] - a[1])
                }
            }
            ExponPdf => {
                if a[0] >= 0.0 {
                    a[1] * (-a[1] * a[0]).exp()
                } else {
                    0.0
                }
            }
            ExponCdf => {
                if a[0] >= 0.0 {
                    1.0 - (-a[1] * a[0]).exp()
                } else {
                    0.0
                }
            }
            CauchyPdf => {
                let z = (a[0] - a[1]) / a[2];
                1.0 / (PI * a[2] * (1.0 + z * z))
            }
            CauchyCdf => 0.5 + ((a[0] - a[1]) / a[2]).atan() / PI,
            StudentPdf => {
                let nu = a[1];
                let log_norm = special::ln_gamma((nu + 1.0) / 2.0)
                    - special::ln_gamma(nu / 2.0)
                    - 0.5 * (nu * PI).ln();
                (log_norm - (nu + 1.0) / 2.0 * (a[0] * a[0] / nu).ln_1p()).exp()
            }
            BetaPdf => {
                let (x, alpha, beta) = (a[0], a[1], a[2]);
                if !(0.0..=1.0).contains(&x) {
                    0.0
                } else {
                    let log_beta = special::ln_gamma(alpha) + special::ln_gamma(beta)
                        - special::ln_gamma(alpha + beta);
                    x.powf(alpha - 1.0) * (1.0 - x).powf(beta - 1.0) / log_beta.exp()
                }
            }
            Chi2Pdf => gamma_pdf(a[0], a[1] / 2.0, 0.5),
            GammaPdf => gamma_pdf(a[0], a[1], a[2]),
        }
    }
}

fn positive(x: f64) -> f64 {
    // `ln(0)` is -inf in IEEE arithmetic but a domain error here.
    if x <= 0.0 {
        f64::NAN
    } else {
        x
    }
}

fn pick(condition: bool, when_true: f64, when_false: f64) -> f64 {
    if condition {
        when_true
    } else {
        when_false
    }
}

/// Triangular distribution on `[a, b]` with mode `c`.
fn triangle_pdf(x: f64, a: f64, b: f64, c: f64) -> f64 {
    if x < a || x > b {
        0.0
    } else if x <= c {
        2.0 * (x - a) / ((b - a) * (c - a))
    } else {
        2.0 * (b - x) / ((b - a) * (b - c))
    }
}

fn triangle_cdf(x: f64, a: f64, b: f64, c: f64) -> f64 {
    if x < a {
        0.0
    } else if x <= c {
        (x - a).powi(2) / ((b - a) * (c - a))
    } else if x <= b {
        1.0 - (b - x).powi(2) / ((b - a) * (b - c))
    } else {
        1.0
    }
}

/// Gamma distribution with shape `alpha` and rate `beta`.
fn gamma_pdf(x: f64, alpha: f64, beta: f64) -> f64 {
    if x < 0.0 {
        return 0.0;
    }
    if x == 0.0 {
        return if alpha == 1.0 { beta } else if alpha > 1.0 { 0.0 } else { f64::INFINITY };
    }
    (alpha * beta.ln() + (alpha - 1.0) * x.ln() - beta * x - special::ln_gamma(alpha)).exp()
}
