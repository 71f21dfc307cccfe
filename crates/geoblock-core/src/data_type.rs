//! Pixel data types.
//!
//! Every raster band stores samples of exactly one [`DataType`]. The set is
//! closed: integer, floating-point and complex variants of the usual widths.
//! Buffers crossing the band API carry a type tag and a plain byte slice, so
//! conversions dispatch through a finite `match` (see [`crate::convert`]).
//!
//! # Usage
//!
//! ```rust
//! use geoblock_core::DataType;
//!
//! assert_eq!(DataType::Int16.size_bytes(), 2);
//! assert_eq!(DataType::CFloat32.size_bytes(), 8);
//! assert_eq!(DataType::union(DataType::Byte, DataType::Int16), DataType::Int16);
//! assert_eq!(DataType::from_name("float32"), Some(DataType::Float32));
//! ```

use std::fmt;

use num_complex::Complex;

/// Sample type of a raster band or caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataType {
    /// 8-bit unsigned integer.
    #[default]
    Byte,
    /// 16-bit unsigned integer.
    UInt16,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Complex of two 16-bit signed integers.
    CInt16,
    /// Complex of two 32-bit signed integers.
    CInt32,
    /// Complex of two 32-bit floats.
    CFloat32,
    /// Complex of two 64-bit floats.
    CFloat64,
}

impl DataType {
    /// All data types, in declaration order.
    pub const ALL: [DataType; 11] = [
        Self::Byte,
        Self::UInt16,
        Self::Int16,
        Self::UInt32,
        Self::Int32,
        Self::Float32,
        Self::Float64,
        Self::CInt16,
        Self::CInt32,
        Self::CFloat32,
        Self::CFloat64,
    ];

    /// Size of one sample in bits (both parts for complex types).
    #[inline]
    pub const fn size_bits(&self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::UInt16 | Self::Int16 => 16,
            Self::UInt32 | Self::Int32 | Self::Float32 | Self::CInt16 => 32,
            Self::Float64 | Self::CInt32 | Self::CFloat32 => 64,
            Self::CFloat64 => 128,
        }
    }

    /// Size of one sample in bytes.
    #[inline]
    pub const fn size_bytes(&self) -> usize {
        (self.size_bits() / 8) as usize
    }

    /// Whether samples have a real and an imaginary part.
    #[inline]
    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::CInt16 | Self::CInt32 | Self::CFloat32 | Self::CFloat64)
    }

    /// Whether samples (or their parts) are floating point.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(
            self,
            Self::Float32 | Self::Float64 | Self::CFloat32 | Self::CFloat64
        )
    }

    /// Whether samples (or their parts) are integers.
    #[inline]
    pub const fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Whether samples (or their parts) can hold negative values.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        !matches!(self, Self::Byte | Self::UInt16 | Self::UInt32)
    }

    /// The real type of one part: `CInt16` gives `Int16`, real types give
    /// themselves.
    #[inline]
    pub const fn component(&self) -> DataType {
        match self {
            Self::CInt16 => Self::Int16,
            Self::CInt32 => Self::Int32,
            Self::CFloat32 => Self::Float32,
            Self::CFloat64 => Self::Float64,
            other => *other,
        }
    }

    /// Canonical name, as used in file headers and metadata.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Byte => "Byte",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
            Self::UInt32 => "UInt32",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::CInt16 => "CInt16",
            Self::CInt32 => "CInt32",
            Self::CFloat32 => "CFloat32",
            Self::CFloat64 => "CFloat64",
        }
    }

    /// Looks up a type by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<DataType> {
        Self::ALL
            .iter()
            .copied()
            .find(|dt| dt.name().eq_ignore_ascii_case(name))
    }

    /// Stable numeric code used by the raw file header.
    pub const fn code(&self) -> u16 {
        match self {
            Self::Byte => 1,
            Self::UInt16 => 2,
            Self::Int16 => 3,
            Self::UInt32 => 4,
            Self::Int32 => 5,
            Self::Float32 => 6,
            Self::Float64 => 7,
            Self::CInt16 => 8,
            Self::CInt32 => 9,
            Self::CFloat32 => 10,
            Self::CFloat64 => 11,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u16) -> Option<DataType> {
        Self::ALL.iter().copied().find(|dt| dt.code() == code)
    }

    /// Smallest type able to represent every value of both `a` and `b`.
    ///
    /// Unsigned and signed integers of the same width promote to the next
    /// signed width. Integers wider than 16 bits mixed with `Float32` promote
    /// to `Float64`. Complex wins over real.
    pub fn union(a: DataType, b: DataType) -> DataType {
        let complex = a.is_complex() || b.is_complex();
        let (ca, cb) = (a.component(), b.component());

        let mut unsigned_bits = 0;
        let mut signed_bits = 0;
        let mut float_bits = 0;
        for dt in [ca, cb] {
            let bits = dt.size_bits();
            if dt.is_float() {
                float_bits = float_bits.max(bits);
            } else if dt.is_signed() {
                signed_bits = signed_bits.max(bits);
            } else {
                unsigned_bits = unsigned_bits.max(bits);
            }
        }

        let real = if float_bits > 0 {
            if float_bits == 64 || unsigned_bits.max(signed_bits) >= 32 {
                Self::Float64
            } else {
                Self::Float32
            }
        } else if signed_bits > 0 {
            let needed = if unsigned_bits > 0 {
                signed_bits.max(unsigned_bits * 2)
            } else {
                signed_bits
            };
            match needed {
                0..=16 => Self::Int16,
                17..=32 => Self::Int32,
                _ => Self::Float64,
            }
        } else {
            match unsigned_bits {
                0..=8 => Self::Byte,
                9..=16 => Self::UInt16,
                _ => Self::UInt32,
            }
        };

        if complex { real.to_complex() } else { real }
    }

    /// Complex type able to hold this type's values as the real part.
    pub const fn to_complex(&self) -> DataType {
        match self {
            Self::Byte | Self::Int16 | Self::CInt16 => Self::CInt16,
            Self::UInt16 | Self::Int32 | Self::CInt32 => Self::CInt32,
            Self::Float32 | Self::CFloat32 => Self::CFloat32,
            Self::UInt32 | Self::Float64 | Self::CFloat64 => Self::CFloat64,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Rust sample type with a matching [`DataType`].
///
/// Used by the typed convenience API (`read_as::<T>`, `write_from::<T>`) so
/// callers can pass `&mut [f32]` instead of a tagged byte slice.
pub trait Pixel: bytemuck::Pod + Send + Sync + 'static {
    /// Data type tag for this sample type.
    const DATA_TYPE: DataType;
}

macro_rules! impl_pixel {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(impl Pixel for $ty {
            const DATA_TYPE: DataType = DataType::$dt;
        })*
    };
}

impl_pixel! {
    u8 => Byte,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    f32 => Float32,
    f64 => Float64,
    Complex<i16> => CInt16,
    Complex<i32> => CInt32,
    Complex<f32> => CFloat32,
    Complex<f64> => CFloat64,
}
