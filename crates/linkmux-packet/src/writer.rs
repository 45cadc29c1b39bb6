use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{check_packet, encode_packet, Packet, PacketConfig};
use crate::error::{PacketError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete packet (blocking).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.check_body(packet.body_size())?;
        self.buf.clear();
        encode_packet(packet, &mut self.buf);
        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result
    }

    /// Write a packet that is already in wire form.
    ///
    /// The header is validated and the declared body size must match the
    /// slice length, so a malformed buffer never reaches the stream.
    pub fn write_encoded(&mut self, wire: &[u8]) -> Result<()> {
        let header = check_packet(wire)?;
        self.check_body(header.body_size as usize)?;
        self.write_all(wire)
    }

    fn check_body(&self, size: usize) -> Result<()> {
        if size > self.config.max_body_size {
            return Err(PacketError::BodyTooLarge {
                size,
                max: self.config.max_body_size,
            });
        }
        Ok(())
    }

    fn write_all(&mut self, wire: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < wire.len() {
            match self.inner.write(&wire[offset..]) {
                Ok(0) => return Err(PacketError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(PacketError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(PacketError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::codec::{decode_packet, split_packet, PacketType, DEFAULT_MAX_BODY};

    fn data(channel: u32, payload: &'static [u8]) -> Packet {
        Packet::new(PacketType::Data, channel, 1, Bytes::from_static(payload)).unwrap()
    }

    fn written(writer: PacketWriter<Cursor<Vec<u8>>>) -> Vec<Packet> {
        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let mut packets = Vec::new();
        while let Some(bytes) = split_packet(&mut wire, DEFAULT_MAX_BODY).unwrap() {
            packets.push(decode_packet(&bytes).unwrap());
        }
        assert!(wire.is_empty());
        packets
    }

    #[test]
    fn write_multiple_packets() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_packet(&data(1, b"one")).unwrap();
        writer.write_packet(&data(2, b"two")).unwrap();
        writer.write_packet(&data(3, b"three")).unwrap();

        let packets = written(writer);
        assert_eq!(packets, vec![data(1, b"one"), data(2, b"two"), data(3, b"three")]);
    }

    #[test]
    fn body_too_large_rejected() {
        let cfg = PacketConfig {
            max_body_size: 4,
            ..PacketConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.write_packet(&data(1, b"oversized")).unwrap_err();
        assert!(matches!(err, PacketError::BodyTooLarge { size: 9, max: 4 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn write_encoded_passes_valid_bytes_through() {
        let mut wire = BytesMut::new();
        encode_packet(&data(9, b"pre-encoded"), &mut wire);

        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_encoded(&wire).unwrap();

        assert_eq!(written(writer), vec![data(9, b"pre-encoded")]);
    }

    #[test]
    fn write_encoded_rejects_length_mismatch() {
        let mut wire = BytesMut::new();
        encode_packet(&data(9, b"abc"), &mut wire);
        wire.extend_from_slice(b"!");

        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.write_encoded(&wire).unwrap_err();
        assert!(matches!(err, PacketError::LengthMismatch { .. }));

        wire.truncate(wire.len() - 2);
        let err = writer.write_encoded(&wire).unwrap_err();
        assert!(matches!(err, PacketError::Truncated { .. }));

        let err = writer.write_encoded(b"junk").unwrap_err();
        assert!(matches!(err, PacketError::Truncated { .. }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);

        writer.write_packet(&data(1, b"x")).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut writer = PacketWriter::new(FlakyWriter::new(ErrorKind::Interrupted));
        writer.write_packet(&data(5, b"retry")).unwrap();

        assert!(!writer.into_inner().data.is_empty());
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let mut writer = PacketWriter::new(FlakyWriter::new(ErrorKind::WouldBlock));
        writer.write_packet(&data(6, b"retry")).unwrap();

        assert!(!writer.into_inner().data.is_empty());
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = PacketWriter::new(ZeroWriter);
        let err = writer.write_packet(&data(1, b"x")).unwrap_err();
        assert!(matches!(err, PacketError::ConnectionClosed));
    }

    #[test]
    fn written_bytes_read_back() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_packet(&data(3, b"z")).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = crate::reader::PacketReader::new(Cursor::new(wire));
        assert_eq!(reader.read_decoded().unwrap(), data(3, b"z"));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first write and the first flush with `kind`.
    struct FlakyWriter {
        kind: ErrorKind,
        write_failed: bool,
        flush_failed: bool,
        data: Vec<u8>,
    }

    impl FlakyWriter {
        fn new(kind: ErrorKind) -> Self {
            Self {
                kind,
                write_failed: false,
                flush_failed: false,
                data: Vec::new(),
            }
        }
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_failed {
                self.write_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_failed {
                self.flush_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
