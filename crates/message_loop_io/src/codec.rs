// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Length-prefixed framing helpers for the byte vectors and strings the
//! drainers and the VFS dispatcher pass around: a little-endian `u32`
//! length, then the payload.

use std::io::{self, Read, Write};

/// Writes `data` as a length-prefixed frame.
pub fn write_vector(writer: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "vector too large to frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)
}

/// Reads a length-prefixed frame written by [`write_vector`].
pub fn read_vector(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_bytes = [0_u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut data = vec![0_u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Writes `text` as a length-prefixed UTF-8 frame.
pub fn write_string(writer: &mut impl Write, text: &str) -> io::Result<()> {
    write_vector(writer, text.as_bytes())
}

/// Reads a length-prefixed frame and validates it as UTF-8.
pub fn read_string(reader: &mut impl Read) -> io::Result<String> {
    let bytes = read_vector(reader)?;
    String::from_utf8(bytes).map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}
