//! Buffer queues between messaging components
//!
//! Components never hand each other bytes directly. A producer pulls a ring
//! buffer from the shared pool, fills it and posts its handle to a port; the
//! consumer bound to that port takes the handle, drains the buffer and either
//! forwards it or releases it back to the pool.
//!
//! Two buffer shapes travel through ports:
//!
//! - raw byte buffers, one token per received byte, straight off a transport
//! - message buffers: the plane byte as the first token, then the payload

use heapless::{Deque, Vec};

use crate::critical_region;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::{PlaneAddress, MAX_PAYLOAD};
use crate::pool::{BufferHandle, BufferPool};
use crate::ring_buffer::{RingBuffer, Token};

/// Index of one port inside a `MessagePorts`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortId(u8);

impl PortId {
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Object-safe view of the buffer pool and its ports handed to services
pub trait MessageExchange {
    /// Whether pool and queue operations mask interrupts
    fn guarded(&self) -> bool;

    /// Filled buffers waiting on `port`
    fn pending(&self, port: PortId) -> usize;

    /// Oldest filled buffer on `port`
    fn take(&mut self, port: PortId) -> Option<BufferHandle>;

    /// Queue a filled buffer on `port`
    ///
    /// On failure the buffer is released back to the pool, so it is never
    /// lost.
    fn post(&mut self, port: PortId, handle: BufferHandle) -> Result<(), LinkError>;

    /// Take an empty buffer from the pool
    fn pull_buffer(&mut self) -> Option<BufferHandle>;

    /// Return a buffer to the pool
    fn release(&mut self, handle: BufferHandle) -> Result<(), LinkError>;

    fn buffer(&self, handle: &BufferHandle) -> &RingBuffer;

    fn buffer_mut(&mut self, handle: &BufferHandle) -> &mut RingBuffer;

    /// Append raw bytes to `port`
    ///
    /// Tops up the newest buffer already queued on the port before pulling
    /// fresh ones, so a byte-at-a-time receive interrupt does not burn a
    /// buffer per byte. Returns the number of bytes accepted; a short count
    /// means the pool ran dry.
    fn append_bytes(&mut self, port: PortId, bytes: &[u8]) -> usize;

    /// Build a message buffer for `payload` and post it to `port`
    ///
    /// # Errors
    ///
    /// - `LinkError::DefinitionError` if the payload is empty, longer than
    ///   62 bytes, or does not fit the pool's buffers
    /// - `LinkError::RingBufferListEmpty` if the pool is exhausted
    fn post_message(
        &mut self,
        port: PortId,
        plane: PlaneAddress,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(LinkError::DefinitionError);
        }
        let handle = self.pull_buffer().ok_or(LinkError::RingBufferListEmpty)?;
        let guarded = self.guarded();

        let mut tokens: Vec<Token, { MAX_PAYLOAD + 1 }> = Vec::new();
        let _ = tokens.push(Token::from(plane.to_byte()));
        for &byte in payload {
            let _ = tokens.push(Token::from(byte));
        }
        if self.buffer_mut(&handle).load(&tokens, guarded) != tokens.len() {
            self.release(handle)?;
            return Err(LinkError::DefinitionError);
        }
        self.post(port, handle)
    }

    /// Drain a message buffer into its plane address and payload
    ///
    /// The buffer is left empty.
    ///
    /// # Errors
    ///
    /// `LinkError::RingBufferEmpty` if the buffer held no plane token.
    fn read_message(
        &mut self,
        handle: &BufferHandle,
    ) -> Result<(PlaneAddress, Vec<u8, MAX_PAYLOAD>), LinkError> {
        let guarded = self.guarded();
        let buffer = self.buffer_mut(handle);
        let mut plane: [Token; 1] = [0];
        if buffer.unload(&mut plane, 1, guarded) == 0 {
            return Err(LinkError::RingBufferEmpty);
        }
        let mut raw = [0u8; MAX_PAYLOAD];
        let count = buffer.unload_bytes(&mut raw, guarded);
        let mut payload = Vec::new();
        let _ = payload.extend_from_slice(&raw[..count]);
        Ok((PlaneAddress::from_byte(plane[0] as u8), payload))
    }
}

/// `P` ports sharing one pool of `N` buffers
pub struct MessagePorts<const P: usize, const N: usize> {
    pool: BufferPool<N>,
    queues: [Deque<BufferHandle, N>; P],
    guarded: bool,
}

impl<const P: usize, const N: usize> MessagePorts<P, N> {
    /// Build the pool and empty ports
    ///
    /// # Errors
    ///
    /// - `LinkError::NullOrMissingParameter` if `P` or `N` is zero
    /// - `LinkError::DefinitionError` for an invalid ring length
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        if P == 0 {
            return Err(LinkError::NullOrMissingParameter);
        }
        Ok(Self {
            pool: BufferPool::set_initialise(config.ring_length)?,
            queues: core::array::from_fn(|_| Deque::new()),
            guarded: config.pool_guarded,
        })
    }

    /// Checked port lookup
    ///
    /// # Errors
    ///
    /// Returns `LinkError::ParameterOutOfRange` if `index >= P`.
    pub fn port(&self, index: u8) -> Result<PortId, LinkError> {
        if usize::from(index) < P {
            Ok(PortId(index))
        } else {
            Err(LinkError::ParameterOutOfRange)
        }
    }

    pub fn pool(&self) -> &BufferPool<N> {
        &self.pool
    }

    /// Buffers held in ports, in flight elsewhere, or free add up to `N`
    pub fn queued(&self) -> usize {
        self.queues.iter().map(Deque::len).sum()
    }
}

impl<const P: usize, const N: usize> MessageExchange for MessagePorts<P, N> {
    fn guarded(&self) -> bool {
        self.guarded
    }

    fn pending(&self, port: PortId) -> usize {
        self.queues.get(port.index()).map_or(0, Deque::len)
    }

    fn take(&mut self, port: PortId) -> Option<BufferHandle> {
        let queue = self.queues.get_mut(port.index())?;
        critical_region::run(self.guarded, || queue.pop_front())
    }

    fn post(&mut self, port: PortId, handle: BufferHandle) -> Result<(), LinkError> {
        let Some(queue) = self.queues.get_mut(port.index()) else {
            self.pool.push(handle, self.guarded)?;
            return Err(LinkError::ParameterOutOfRange);
        };
        match critical_region::run(self.guarded, || queue.push_back(handle)) {
            Ok(()) => Ok(()),
            Err(handle) => {
                error!("port {} overflow", port.index());
                self.pool.push(handle, self.guarded)?;
                Err(LinkError::DefinitionError)
            }
        }
    }

    fn pull_buffer(&mut self) -> Option<BufferHandle> {
        self.pool.pull(self.guarded)
    }

    fn release(&mut self, handle: BufferHandle) -> Result<(), LinkError> {
        self.pool.push(handle, self.guarded)
    }

    fn buffer(&self, handle: &BufferHandle) -> &RingBuffer {
        self.pool.buffer(handle)
    }

    fn buffer_mut(&mut self, handle: &BufferHandle) -> &mut RingBuffer {
        self.pool.buffer_mut(handle)
    }

    fn append_bytes(&mut self, port: PortId, bytes: &[u8]) -> usize {
        if port.index() >= P {
            return 0;
        }
        let guarded = self.guarded;
        let mut accepted = 0;

        if let Some(tail) = self.queues[port.index()].back() {
            accepted += self.pool.buffer_mut(tail).load_bytes(bytes, guarded);
        }
        while accepted < bytes.len() {
            let Some(handle) = self.pool.pull(guarded) else {
                break;
            };
            accepted += self.pool.buffer_mut(&handle).load_bytes(&bytes[accepted..], guarded);
            if self.post(port, handle).is_err() {
                break;
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CommsPlane, SignalPlane};

    type Ports = MessagePorts<3, 4>;

    fn ports() -> Ports {
        MessagePorts::new(&LinkConfig::default()).unwrap()
    }

    #[test]
    fn test_port_lookup_range() {
        let ports = ports();
        assert_eq!(ports.port(2), Ok(PortId::new(2)));
        assert_eq!(ports.port(3), Err(LinkError::ParameterOutOfRange));
    }

    #[test]
    fn test_zero_ports_rejected() {
        assert_eq!(
            MessagePorts::<0, 4>::new(&LinkConfig::default()).err(),
            Some(LinkError::NullOrMissingParameter)
        );
    }

    #[test]
    fn test_post_and_take_are_fifo() {
        let mut ports = ports();
        let port = PortId::new(1);
        let plane = PlaneAddress::new(CommsPlane::Usart0, SignalPlane::Data0);
        ports.post_message(port, plane, b"first").unwrap();
        ports.post_message(port, plane, b"second").unwrap();
        assert_eq!(ports.pending(port), 2);
        assert_eq!(ports.pending(PortId::new(0)), 0);

        let handle = ports.take(port).unwrap();
        let (address, payload) = ports.read_message(&handle).unwrap();
        assert_eq!(address, plane);
        assert_eq!(payload.as_slice(), b"first");
        ports.release(handle).unwrap();
        assert_eq!(ports.pool().free_count(), 3);
    }

    #[test]
    fn test_read_empty_buffer_is_ring_buffer_empty() {
        let mut ports = ports();
        let handle = ports.pull_buffer().unwrap();
        assert_eq!(ports.read_message(&handle).err(), Some(LinkError::RingBufferEmpty));
        ports.release(handle).unwrap();
        assert_eq!(ports.pool().free_count(), 4);
    }

    #[test]
    fn test_post_to_missing_port_releases_buffer() {
        let mut ports = ports();
        let handle = ports.pull_buffer().unwrap();
        assert_eq!(ports.post(PortId::new(7), handle), Err(LinkError::ParameterOutOfRange));
        assert_eq!(ports.pool().free_count(), 4);
    }

    #[test]
    fn test_post_message_pool_exhausted() {
        let mut ports = ports();
        let plane = PlaneAddress::from_byte(0);
        for _ in 0..4 {
            ports.post_message(PortId::new(0), plane, &[1]).unwrap();
        }
        assert_eq!(
            ports.post_message(PortId::new(0), plane, &[1]),
            Err(LinkError::RingBufferListEmpty)
        );
        assert_eq!(ports.queued(), 4);
    }

    #[test]
    fn test_post_message_rejects_bad_payload() {
        let mut ports = ports();
        let plane = PlaneAddress::from_byte(0);
        assert_eq!(
            ports.post_message(PortId::new(0), plane, &[]),
            Err(LinkError::DefinitionError)
        );
        assert_eq!(
            ports.post_message(PortId::new(0), plane, &[0; 63]),
            Err(LinkError::DefinitionError)
        );
        assert_eq!(ports.pool().free_count(), 4);
    }

    #[test]
    fn test_post_message_too_long_for_short_buffers() {
        let config = LinkConfig {
            ring_length: 8,
            ..LinkConfig::default()
        };
        let mut ports: Ports = MessagePorts::new(&config).unwrap();
        let plane = PlaneAddress::from_byte(0x21);
        assert_eq!(
            ports.post_message(PortId::new(0), plane, &[0; 8]),
            Err(LinkError::DefinitionError)
        );
        assert_eq!(ports.pool().free_count(), 4);
        ports.post_message(PortId::new(0), plane, &[0; 7]).unwrap();
    }

    #[test]
    fn test_append_bytes_tops_up_tail_buffer() {
        let config = LinkConfig {
            ring_length: 4,
            ..LinkConfig::default()
        };
        let mut ports: Ports = MessagePorts::new(&config).unwrap();
        let port = PortId::new(0);

        assert_eq!(ports.append_bytes(port, &[1, 2]), 2);
        assert_eq!(ports.append_bytes(port, &[3]), 1);
        assert_eq!(ports.pending(port), 1);
        assert_eq!(ports.append_bytes(port, &[4, 5, 6]), 3);
        assert_eq!(ports.pending(port), 2);

        let mut collected: Vec<u8, 8> = Vec::new();
        while let Some(handle) = ports.take(port) {
            let mut bytes = [0u8; 4];
            let n = ports.buffer_mut(&handle).unload_bytes(&mut bytes, true);
            collected.extend_from_slice(&bytes[..n]).unwrap();
            ports.release(handle).unwrap();
        }
        assert_eq!(collected.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_append_bytes_short_when_pool_dry() {
        let config = LinkConfig {
            ring_length: 2,
            ..LinkConfig::default()
        };
        let mut ports: Ports = MessagePorts::new(&config).unwrap();
        assert_eq!(ports.append_bytes(PortId::new(0), &[0; 10]), 8);
        assert_eq!(ports.pool().free_count(), 0);
        assert_eq!(ports.append_bytes(PortId::new(9), &[0]), 0);
    }
}
