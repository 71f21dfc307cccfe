//! Sample conversion between [`DataType`]s.
//!
//! Every conversion routes through `Complex<f64>`, which holds any sample of
//! any supported type exactly. Narrowing to the target applies these rules:
//!
//! | Target | Rule |
//! |--------|------|
//! | same type | byte copy |
//! | integer | round half away from zero, saturate to range, NaN becomes 0 |
//! | `Float32` | cast, finite out-of-range values saturate to `±f32::MAX` |
//! | `Float64` | exact |
//! | complex | each part converted by the real rule, real sources get imaginary 0 |
//! | real from complex | [`Error::UnsupportedConversion`] |
//!
//! Buffers are plain byte slices in native byte order with arbitrary strides,
//! read and written unaligned.
//!
//! # Example
//!
//! ```rust
//! use geoblock_core::{convert, DataType};
//!
//! let src: [f32; 3] = [1.5, -3.0, 300.7];
//! let mut dst = [0u8; 3];
//! convert::convert_buffer(bytemuck::cast_slice(&src), DataType::Float32, &mut dst, DataType::Byte)
//!     .unwrap();
//! assert_eq!(dst, [2, 0, 255]);
//! ```

use bytemuck::pod_read_unaligned;
use num_complex::Complex64;

use crate::data_type::DataType;
use crate::error::{Error, Result};

/// Whether samples of `src` can be converted to `dst`.
///
/// Everything converts except complex to real, which would need an explicit
/// part-extraction policy.
#[inline]
pub const fn can_convert(src: DataType, dst: DataType) -> bool {
    !(src.is_complex() && !dst.is_complex())
}

/// Reads one sample of type `dt` from the start of `bytes`.
///
/// # Panics
///
/// Panics if `bytes` is shorter than `dt.size_bytes()`.
#[inline]
pub fn read_sample(dt: DataType, bytes: &[u8]) -> Complex64 {
    let n = dt.size_bytes();
    let b = &bytes[..n];
    match dt {
        DataType::Byte => real(b[0] as f64),
        DataType::UInt16 => real(pod_read_unaligned::<u16>(b) as f64),
        DataType::Int16 => real(pod_read_unaligned::<i16>(b) as f64),
        DataType::UInt32 => real(pod_read_unaligned::<u32>(b) as f64),
        DataType::Int32 => real(pod_read_unaligned::<i32>(b) as f64),
        DataType::Float32 => real(pod_read_unaligned::<f32>(b) as f64),
        DataType::Float64 => real(pod_read_unaligned::<f64>(b)),
        DataType::CInt16 => {
            let [re, im] = pod_read_unaligned::<[i16; 2]>(b);
            Complex64::new(re as f64, im as f64)
        }
        DataType::CInt32 => {
            let [re, im] = pod_read_unaligned::<[i32; 2]>(b);
            Complex64::new(re as f64, im as f64)
        }
        DataType::CFloat32 => {
            let [re, im] = pod_read_unaligned::<[f32; 2]>(b);
            Complex64::new(re as f64, im as f64)
        }
        DataType::CFloat64 => {
            let [re, im] = pod_read_unaligned::<[f64; 2]>(b);
            Complex64::new(re, im)
        }
    }
}

/// Reads one sample as a real number: the value itself, or the modulus for
/// complex types.
#[inline]
pub fn read_scalar(dt: DataType, bytes: &[u8]) -> f64 {
    let v = read_sample(dt, bytes);
    if dt.is_complex() { v.norm() } else { v.re }
}

/// Writes `value` as one sample of type `dt` at the start of `out`.
///
/// Real targets take the real part. Callers wanting the complex-to-real
/// check go through [`convert_run`].
///
/// # Panics
///
/// Panics if `out` is shorter than `dt.size_bytes()`.
#[inline]
pub fn write_sample(dt: DataType, value: Complex64, out: &mut [u8]) {
    let n = dt.size_bytes();
    let o = &mut out[..n];
    let (re, im) = (value.re, value.im);
    match dt {
        // Float-to-int `as` casts saturate and map NaN to 0.
        DataType::Byte => o[0] = re.round() as u8,
        DataType::UInt16 => o.copy_from_slice(&(re.round() as u16).to_ne_bytes()),
        DataType::Int16 => o.copy_from_slice(&(re.round() as i16).to_ne_bytes()),
        DataType::UInt32 => o.copy_from_slice(&(re.round() as u32).to_ne_bytes()),
        DataType::Int32 => o.copy_from_slice(&(re.round() as i32).to_ne_bytes()),
        DataType::Float32 => o.copy_from_slice(&to_f32(re).to_ne_bytes()),
        DataType::Float64 => o.copy_from_slice(&re.to_ne_bytes()),
        DataType::CInt16 => {
            o[..2].copy_from_slice(&(re.round() as i16).to_ne_bytes());
            o[2..].copy_from_slice(&(im.round() as i16).to_ne_bytes());
        }
        DataType::CInt32 => {
            o[..4].copy_from_slice(&(re.round() as i32).to_ne_bytes());
            o[4..].copy_from_slice(&(im.round() as i32).to_ne_bytes());
        }
        DataType::CFloat32 => {
            o[..4].copy_from_slice(&to_f32(re).to_ne_bytes());
            o[4..].copy_from_slice(&to_f32(im).to_ne_bytes());
        }
        DataType::CFloat64 => {
            o[..8].copy_from_slice(&re.to_ne_bytes());
            o[8..].copy_from_slice(&im.to_ne_bytes());
        }
    }
}

/// Converts `count` samples from a strided source run to a strided
/// destination run.
///
/// Strides are in bytes and must be at least the sample size of their type.
pub fn convert_run(
    src: &[u8],
    src_type: DataType,
    src_stride: usize,
    dst: &mut [u8],
    dst_type: DataType,
    dst_stride: usize,
    count: usize,
) -> Result<()> {
    if !can_convert(src_type, dst_type) {
        return Err(Error::unsupported_conversion(src_type, dst_type));
    }
    if count == 0 {
        return Ok(());
    }
    let (src_size, dst_size) = (src_type.size_bytes(), dst_type.size_bytes());
    if src_stride < src_size || dst_stride < dst_size {
        return Err(Error::invalid_argument(format!(
            "stride smaller than sample size (src {src_stride} < {src_size} or dst {dst_stride} < {dst_size})"
        )));
    }
    if src.len() < (count - 1) * src_stride + src_size {
        return Err(Error::invalid_argument(format!(
            "source run of {count} samples does not fit {} bytes",
            src.len()
        )));
    }
    if dst.len() < (count - 1) * dst_stride + dst_size {
        return Err(Error::invalid_argument(format!(
            "destination run of {count} samples does not fit {} bytes",
            dst.len()
        )));
    }

    if src_type == dst_type {
        if src_stride == src_size && dst_stride == dst_size {
            let n = count * src_size;
            dst[..n].copy_from_slice(&src[..n]);
        } else {
            for i in 0..count {
                let s = i * src_stride;
                let d = i * dst_stride;
                dst[d..d + dst_size].copy_from_slice(&src[s..s + src_size]);
            }
        }
        return Ok(());
    }

    for i in 0..count {
        let v = read_sample(src_type, &src[i * src_stride..]);
        write_sample(dst_type, v, &mut dst[i * dst_stride..]);
    }
    Ok(())
}

/// Converts a packed buffer. The sample count is taken from `src`.
pub fn convert_buffer(
    src: &[u8],
    src_type: DataType,
    dst: &mut [u8],
    dst_type: DataType,
) -> Result<()> {
    let count = src.len() / src_type.size_bytes();
    convert_run(
        src,
        src_type,
        src_type.size_bytes(),
        dst,
        dst_type,
        dst_type.size_bytes(),
        count,
    )
}

#[inline]
fn real(v: f64) -> Complex64 {
    Complex64::new(v, 0.0)
}

#[inline]
fn to_f32(v: f64) -> f32 {
    if v.is_finite() {
        v.clamp(-(f32::MAX as f64), f32::MAX as f64) as f32
    } else {
        v as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex;

    fn one(src_type: DataType, bytes: &[u8], dst_type: DataType) -> Vec<u8> {
        let mut out = vec![0u8; dst_type.size_bytes()];
        convert_run(bytes, src_type, src_type.size_bytes(), &mut out, dst_type, dst_type.size_bytes(), 1)
            .unwrap();
        out
    }

    #[test]
    fn integer_targets_round_and_saturate() {
        let src: [f64; 6] = [2.5, -2.5, 1e9, -1e9, f64::NAN, 0.49];
        let mut dst = [0i16; 6];
        convert_buffer(bytemuck::cast_slice(&src), DataType::Float64, bytemuck::cast_slice_mut(&mut dst), DataType::Int16)
            .unwrap();
        assert_eq!(dst, [3, -3, i16::MAX, i16::MIN, 0, 0]);

        let src: [i32; 3] = [-7, 70000, 42];
        let mut dst = [0u16; 3];
        convert_buffer(bytemuck::cast_slice(&src), DataType::Int32, bytemuck::cast_slice_mut(&mut dst), DataType::UInt16)
            .unwrap();
        assert_eq!(dst, [0, u16::MAX, 42]);
    }

    #[test]
    fn float32_saturates_finite_values() {
        let out = one(DataType::Float64, &1e300f64.to_ne_bytes(), DataType::Float32);
        assert_eq!(f32::from_ne_bytes(out.try_into().unwrap()), f32::MAX);
        let out = one(DataType::Float64, &f64::NEG_INFINITY.to_ne_bytes(), DataType::Float32);
        assert_eq!(f32::from_ne_bytes(out.try_into().unwrap()), f32::NEG_INFINITY);
    }

    #[test]
    fn float64_is_exact() {
        let v = u32::MAX;
        let out = one(DataType::UInt32, &v.to_ne_bytes(), DataType::Float64);
        assert_eq!(f64::from_ne_bytes(out.try_into().unwrap()), u32::MAX as f64);
    }

    #[test]
    fn complex_rules() {
        let out = one(DataType::Int16, &(-5i16).to_ne_bytes(), DataType::CFloat32);
        let c: Complex<f32> = bytemuck::pod_read_unaligned(&out);
        assert_eq!(c, Complex::new(-5.0, 0.0));

        let src = Complex::<f64>::new(1.6, -70000.0);
        let out = one(DataType::CFloat64, bytemuck::bytes_of(&src), DataType::CInt16);
        let c: Complex<i16> = bytemuck::pod_read_unaligned(&out);
        assert_eq!(c, Complex::new(2, i16::MIN));

        let mut dst = [0u8; 1];
        let err = convert_buffer(&[0u8; 4], DataType::CInt16, &mut dst, DataType::Byte).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { .. }));
        assert!(!can_convert(DataType::CFloat32, DataType::Float64));
        assert!(can_convert(DataType::Float64, DataType::CInt16));
    }

    #[test]
    fn scalar_uses_modulus() {
        let c = Complex::<f32>::new(3.0, 4.0);
        assert_relative_eq!(read_scalar(DataType::CFloat32, bytemuck::bytes_of(&c)), 5.0);
        assert_relative_eq!(read_scalar(DataType::Int16, &(-9i16).to_ne_bytes()), -9.0);
    }

    #[test]
    fn strided_copy() {
        let src: [u8; 6] = [1, 0, 2, 0, 3, 0];
        let mut dst = [9u8; 9];
        convert_run(&src, DataType::Byte, 2, &mut dst, DataType::Byte, 3, 3).unwrap();
        assert_eq!(dst, [1, 9, 9, 2, 9, 9, 3, 9, 9]);
    }

    #[test]
    fn short_buffers_rejected() {
        let mut dst = [0u8; 2];
        let err = convert_run(&[0u8; 3], DataType::Byte, 1, &mut dst, DataType::Byte, 1, 3).unwrap_err();
        assert!(err.is_invalid_argument());
        let err = convert_run(&[0u8; 3], DataType::UInt16, 1, &mut dst, DataType::Byte, 1, 1).unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
