//! XDR (RFC 4506) primitive codec used by every RPC message and payload.
//!
//! The codec is deliberately generic: it knows nothing about RPC. Message
//! types in [`rpc`] and [`portmap`] and user argument/result types implement
//! [`Serialize`] and [`Deserialize`] on top of the primitives defined here.
//!
//! Where appropriate, XDR types were replaced by their Rust counterparts:
//! `int` is `i32`, `unsigned int` is `u32`, `hyper` is `i64`, `opaque<>` is
//! `Vec<u8>`/`[u8]`, `string<>` is `String`/`str`, `T<>` is `Vec<T>`/`[T]`,
//! `T *` (optional data) is `Option<T>` and `void` is `()`.
//!
//! Every item is encoded in a multiple of four bytes, big endian.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

pub mod portmap;
pub mod rpc;
mod utils;

pub use utils::invalid_data;

/// XDR assumes big endian encoding.
pub type XDREndian = BigEndian;

/// Upper bound for a single variable-length item when its declaration
/// carries no explicit maximum.
const MAX_UNBOUNDED_LEN: usize = 64 * 1024 * 1024;

pub trait Serialize {
    /// Serializes the implementing type to the provided writer.
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

pub trait Deserialize {
    /// Deserializes data from the provided reader into the implementing type.
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Deserialization based on the [Default] trait of the type T.
pub fn deserialize<T>(src: &mut impl Read) -> std::io::Result<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;

    Ok(val)
}

/// Serializes `value` into a fresh buffer.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    Ok(buf)
}

/// Marker trait for XDR `enum` type serialization.
pub trait SerializeEnum: ToPrimitive {}

/// Enumerations have the same representation as signed integers.
impl<T: SerializeEnum> Serialize for T {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        if let Some(val) = self.to_i32() {
            return dest.write_i32::<XDREndian>(val);
        }
        Err(invalid_data("Invalid enum value"))
    }
}

/// Marker trait for XDR `enum` type deserialization.
pub trait DeserializeEnum: FromPrimitive {}

/// Enumerations have the same representation as signed integers.
impl<T: DeserializeEnum> Deserialize for T {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let val = src.read_i32::<XDREndian>()?;
        if let Some(val) = FromPrimitive::from_i32(val) {
            *self = val;
            return Ok(());
        }

        Err(invalid_data(&format!("Invalid enum value {val}")))
    }
}

/// XDR `void`. Encodes to nothing; used for procedures without
/// arguments or results.
impl Serialize for () {
    fn serialize<W: Write>(&self, _dest: &mut W) -> std::io::Result<()> {
        Ok(())
    }
}

impl Deserialize for () {
    fn deserialize<R: Read>(&mut self, _src: &mut R) -> std::io::Result<()> {
        Ok(())
    }
}

/// XDR `bool` is an `enum { FALSE = 0, TRUE = 1 }`, i.e. an `i32` on the wire.
impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(if *self { 1 } else { 0 })
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match src.read_i32::<XDREndian>()? {
            0 => *self = false,
            1 => *self = true,
            _ => return Err(invalid_data("Invalid value for bool enum")),
        }
        Ok(())
    }
}

/// XDR `int`.
impl Serialize for i32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XDREndian>()?;
        Ok(())
    }
}

/// XDR `unsigned int`.
impl Serialize for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()?;
        Ok(())
    }
}

/// XDR `hyper`.
impl Serialize for i64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i64::<XDREndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XDREndian>()?;
        Ok(())
    }
}

/// XDR `unsigned hyper`.
impl Serialize for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XDREndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XDREndian>()?;
        Ok(())
    }
}

/// XDR Fixed-Length Opaque Data, `opaque identifier[n];`.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)?;
        utils::write_padding(N, dest)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)?;
        utils::read_padding(N, src)
    }
}

/// Writes a length prefix; lengths are always `unsigned int` on the wire.
fn write_len<W: Write>(len: usize, dest: &mut W) -> std::io::Result<()> {
    let Some(len) = len.to_u32() else {
        return Err(invalid_data("cannot cast `usize` to `u32`"));
    };
    len.serialize(dest)
}

/// Reads a length prefix and checks it against `max`.
fn read_len<R: Read>(src: &mut R, max: usize) -> std::io::Result<usize> {
    let Some(len) = deserialize::<u32>(src)?.to_usize() else {
        return Err(invalid_data("cannot cast `u32` to `usize`"));
    };
    if len > max {
        return Err(invalid_data(&format!("item length {len} exceeds max {max}")));
    }
    Ok(len)
}

/// Reads `opaque identifier<max>;` into `dest`.
///
/// Bytes are pulled through `take`, so a forged length never allocates more
/// than what actually arrived.
pub fn read_opaque<R: Read>(src: &mut R, dest: &mut Vec<u8>, max: usize) -> std::io::Result<()> {
    let len = read_len(src, max)?;
    dest.clear();
    src.by_ref().take(len as u64).read_to_end(dest)?;
    if dest.len() != len {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    utils::read_padding(len, src)
}

/// XDR Variable-Length Opaque Data, `opaque identifier<>;`.
impl Serialize for [u8] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_len(self.len(), dest)?;
        dest.write_all(self)?;
        utils::write_padding(self.len(), dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        read_opaque(src, self, MAX_UNBOUNDED_LEN)
    }
}

/// XDR String, `string identifier<>;`.
impl Serialize for str {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_bytes().serialize(dest)
    }
}

impl Serialize for String {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_str().serialize(dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let bytes = deserialize::<Vec<u8>>(src)?;
        *self = String::from_utf8(bytes).map_err(|_| invalid_data("Not UTF-8 string"))?;
        Ok(())
    }
}

/// XDR Variable-Length Array, `T identifier<>;`.
impl<T: Serialize> Serialize for [T] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_len(self.len(), dest)?;
        for i in self {
            i.serialize(dest)?;
        }

        Ok(())
    }
}

impl<T> Serialize for Vec<T>
where
    [T]: Serialize,
{
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_slice().serialize(dest)
    }
}

impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = read_len(src, MAX_UNBOUNDED_LEN)?;
        self.clear();
        for _ in 0..length {
            self.push(deserialize::<T>(src)?);
        }
        Ok(())
    }
}

/// XDR Optional-Data, `T *identifier;`.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            Some(data) => {
                true.serialize(dest)?;
                data.serialize(dest)
            }
            None => false.serialize(dest),
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? { Some(deserialize::<T>(src)?) } else { None };
        Ok(())
    }
}

/// Implements [`Serialize`] for a struct by encoding its fields in order.
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Serialize for $t {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $($crate::xdr::Serialize::serialize(&self.$element, dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Deserialize`] for a struct by decoding its fields in order.
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Deserialize for $t {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $($crate::xdr::Deserialize::deserialize(&mut self.$element, src)?;)*
                Ok(())
            }
        }
    };
}

pub use crate::DeserializeStruct;
pub use crate::SerializeStruct;
