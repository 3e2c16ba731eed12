//! Ready-made component handlers
//!
//! Receive path: bytes arrive either as raw buffers on a port (filled by a
//! receive interrupt) or straight from a `CharacterPort`, are de-framed, and
//! every accepted frame is posted onward as a message buffer.
//!
//! Transmit path: message buffers are framed and written out one byte per
//! ready check, the unsent tail carried over to the next pass.

use heapless::Vec;
use planelink_hal::CharacterPort;

use super::{ComponentInfo, HardwareService, LayerService, MessageExchange};
use crate::frame::{frame_message, Deframer, ReceivedMessage, MAX_FRAME_LENGTH};
use crate::ring_buffer::RING_BUFFER_MAX_LENGTH;

/// Bytes pulled from a hardware port per pass, so one busy link cannot
/// starve the rest of the loop
const RECEIVE_BURST: usize = 64;

fn deliver(
    component: &ComponentInfo,
    message: &ReceivedMessage,
    exchange: &mut dyn MessageExchange,
) -> bool {
    match exchange.post_message(component.layer, message.plane, &message.payload) {
        Ok(()) => true,
        Err(e) => {
            warn!("component {}: message dropped: {}", component.index, e);
            false
        }
    }
}

/// De-frames raw byte buffers from the server port
///
/// Frames may span buffer boundaries; the de-framer state carries over.
#[derive(Default)]
pub struct FrameReceiveService {
    deframer: Deframer,
    dropped: u32,
}

impl FrameReceiveService {
    pub const fn new() -> Self {
        Self {
            deframer: Deframer::new(),
            dropped: 0,
        }
    }

    pub fn deframer(&self) -> &Deframer {
        &self.deframer
    }

    /// Accepted frames that could not be posted onward
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl LayerService for FrameReceiveService {
    fn service(
        &mut self,
        component: &ComponentInfo,
        _components: &[Option<ComponentInfo>],
        exchange: &mut dyn MessageExchange,
    ) {
        let guarded = exchange.guarded();
        while let Some(handle) = exchange.take(component.server) {
            let mut raw = [0u8; RING_BUFFER_MAX_LENGTH];
            let count = exchange.buffer_mut(&handle).unload_bytes(&mut raw, guarded);
            if exchange.release(handle).is_err() {
                crate::critical_region::raise_fault();
            }

            for &byte in &raw[..count] {
                if let Some(Ok(message)) = self.deframer.push(byte) {
                    if !deliver(component, &message, exchange) {
                        self.dropped = self.dropped.wrapping_add(1);
                    }
                }
            }
        }
    }
}

/// Forwards message buffers to the component bound to their planes
///
/// The destination is the first loaded component, other than the router
/// itself and the producers feeding it (components whose layer port is the
/// router's server port), with the same comms-plane and signal-plane.
/// Messages with no destination are released.
#[derive(Default)]
pub struct PlaneRouter {
    routed: u32,
    unroutable: u32,
}

impl PlaneRouter {
    pub const fn new() -> Self {
        Self {
            routed: 0,
            unroutable: 0,
        }
    }

    pub fn routed(&self) -> u32 {
        self.routed
    }

    pub fn unroutable(&self) -> u32 {
        self.unroutable
    }
}

impl LayerService for PlaneRouter {
    fn service(
        &mut self,
        component: &ComponentInfo,
        components: &[Option<ComponentInfo>],
        exchange: &mut dyn MessageExchange,
    ) {
        while let Some(handle) = exchange.take(component.server) {
            let plane = exchange.buffer(&handle).peek().map(|token| token as u8);
            let destination = plane.and_then(|plane| {
                components.iter().flatten().find(|candidate| {
                    candidate.index != component.index
                        && candidate.layer != component.server
                        && candidate.plane().to_byte() == plane
                })
            });

            match destination {
                Some(target) => {
                    if exchange.post(target.server, handle).is_ok() {
                        self.routed = self.routed.wrapping_add(1);
                    } else {
                        self.unroutable = self.unroutable.wrapping_add(1);
                    }
                }
                None => {
                    debug!("router: no component for plane {=u8:#x}", plane.unwrap_or(0));
                    self.unroutable = self.unroutable.wrapping_add(1);
                    if exchange.release(handle).is_err() {
                        crate::critical_region::raise_fault();
                    }
                }
            }
        }
    }
}

/// Polls one character port, de-framing bytes as they arrive
#[derive(Default)]
pub struct SerialReceiveService {
    deframer: Deframer,
    dropped: u32,
}

impl SerialReceiveService {
    pub const fn new() -> Self {
        Self {
            deframer: Deframer::new(),
            dropped: 0,
        }
    }

    pub fn deframer(&self) -> &Deframer {
        &self.deframer
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl HardwareService for SerialReceiveService {
    fn ready(&mut self, port: &mut dyn CharacterPort) -> bool {
        port.rx_ready()
    }

    fn service(
        &mut self,
        component: &ComponentInfo,
        port: &mut dyn CharacterPort,
        exchange: &mut dyn MessageExchange,
    ) {
        for _ in 0..RECEIVE_BURST {
            if !port.rx_ready() {
                break;
            }
            let Some(byte) = port.get() else {
                break;
            };
            if let Some(Ok(message)) = self.deframer.push(byte) {
                if !deliver(component, &message, exchange) {
                    self.dropped = self.dropped.wrapping_add(1);
                }
            }
        }
    }
}

/// Frames message buffers from the server port onto one character port
#[derive(Default)]
pub struct SerialTransmitService {
    wire: Vec<u8, MAX_FRAME_LENGTH>,
    sent: usize,
    frames: u32,
    dropped: u32,
}

impl SerialTransmitService {
    pub const fn new() -> Self {
        Self {
            wire: Vec::new(),
            sent: 0,
            frames: 0,
            dropped: 0,
        }
    }

    /// A frame is partly written
    pub fn busy(&self) -> bool {
        self.sent < self.wire.len()
    }

    /// Frames fully handed to the port
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Message buffers that could not be framed
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Load the next frame; false when the server port is empty
    fn next_frame(
        &mut self,
        component: &ComponentInfo,
        exchange: &mut dyn MessageExchange,
    ) -> bool {
        while let Some(handle) = exchange.take(component.server) {
            let message = exchange.read_message(&handle);
            if exchange.release(handle).is_err() {
                crate::critical_region::raise_fault();
            }

            let framed = message
                .and_then(|(plane, payload)| frame_message(plane.comms, plane.signal, &payload));
            match framed {
                Ok(frame) => {
                    self.wire = frame.to_wire();
                    self.sent = 0;
                    return true;
                }
                Err(e) => {
                    warn!("component {}: message dropped: {}", component.index, e);
                    self.dropped = self.dropped.wrapping_add(1);
                }
            }
        }
        false
    }
}

impl HardwareService for SerialTransmitService {
    fn ready(&mut self, port: &mut dyn CharacterPort) -> bool {
        self.busy() && port.tx_ready()
    }

    fn service(
        &mut self,
        component: &ComponentInfo,
        port: &mut dyn CharacterPort,
        exchange: &mut dyn MessageExchange,
    ) {
        loop {
            if !self.busy() && !self.next_frame(component, exchange) {
                return;
            }
            while self.busy() {
                if !port.tx_ready() || !port.put(self.wire[self.sent]) {
                    return;
                }
                self.sent += 1;
            }
            self.frames = self.frames.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::frame::{CommsPlane, PlaneAddress, SignalPlane};
    use crate::messaging::{MessagePorts, PortId};

    struct ScriptedPort {
        rx: Vec<u8, 256>,
        rx_pos: usize,
        tx: Vec<u8, 512>,
        /// Bytes the transmitter accepts before reporting busy
        tx_budget: usize,
    }

    impl ScriptedPort {
        fn new(rx: &[u8]) -> Self {
            let mut port = Self {
                rx: Vec::new(),
                rx_pos: 0,
                tx: Vec::new(),
                tx_budget: usize::MAX,
            };
            port.rx.extend_from_slice(rx).unwrap();
            port
        }
    }

    impl CharacterPort for ScriptedPort {
        fn rx_ready(&mut self) -> bool {
            self.rx_pos < self.rx.len()
        }

        fn get(&mut self) -> Option<u8> {
            let byte = self.rx.get(self.rx_pos).copied()?;
            self.rx_pos += 1;
            Some(byte)
        }

        fn tx_ready(&mut self) -> bool {
            self.tx_budget > 0
        }

        fn put(&mut self, byte: u8) -> bool {
            if self.tx_budget == 0 {
                return false;
            }
            self.tx_budget -= 1;
            self.tx.push(byte).is_ok()
        }
    }

    fn info(
        index: usize,
        server: u8,
        layer: u8,
        comms: CommsPlane,
        signal: SignalPlane,
    ) -> ComponentInfo {
        ComponentInfo {
            index,
            comms,
            signal,
            server: PortId::new(server),
            layer: PortId::new(layer),
        }
    }

    fn ports() -> MessagePorts<4, 8> {
        MessagePorts::new(&LinkConfig::default()).unwrap()
    }

    fn wire(comms: CommsPlane, signal: SignalPlane, payload: &[u8]) -> Vec<u8, MAX_FRAME_LENGTH> {
        frame_message(comms, signal, payload).unwrap().to_wire()
    }

    #[test]
    fn test_frame_receive_across_buffers() {
        let mut ports = ports();
        let frame = wire(CommsPlane::Usart0, SignalPlane::Data1, &[0x7E, 0x1B, 0x42]);
        let me = info(0, 0, 1, CommsPlane::Usart0, SignalPlane::Data1);

        let mut service = FrameReceiveService::new();
        // Split the frame over two passes
        let (head, tail) = frame.split_at(4);
        ports.append_bytes(PortId::new(0), head);
        service.service(&me, &[Some(me)], &mut ports);
        assert_eq!(ports.pending(PortId::new(1)), 0);
        ports.append_bytes(PortId::new(0), tail);
        service.service(&me, &[Some(me)], &mut ports);

        let handle = ports.take(PortId::new(1)).unwrap();
        let (plane, payload) = ports.read_message(&handle).unwrap();
        assert_eq!(plane, PlaneAddress::new(CommsPlane::Usart0, SignalPlane::Data1));
        assert_eq!(payload.as_slice(), &[0x7E, 0x1B, 0x42]);
        ports.release(handle).unwrap();
        assert_eq!(ports.pool().free_count(), 8);
        assert_eq!(service.deframer().accepted(), 1);
    }

    #[test]
    fn test_router_picks_bound_component() {
        let mut ports = ports();
        let receiver = info(0, 0, 1, CommsPlane::Uart, SignalPlane::Data0);
        let router = info(1, 1, 1, CommsPlane::Uart, SignalPlane::Control0);
        let transmit = info(2, 2, 3, CommsPlane::Uart, SignalPlane::Data0);
        let table = [Some(receiver), Some(router), Some(transmit), None];

        let uart = PlaneAddress::new(CommsPlane::Uart, SignalPlane::Data0);
        let i2c = PlaneAddress::new(CommsPlane::I2c, SignalPlane::Data0);
        ports.post_message(PortId::new(1), uart, b"go").unwrap();
        ports.post_message(PortId::new(1), i2c, b"lost").unwrap();

        let mut service = PlaneRouter::new();
        service.service(&router, &table, &mut ports);
        assert_eq!(service.routed(), 1);
        assert_eq!(service.unroutable(), 1);
        assert_eq!(ports.pending(PortId::new(2)), 1);
        assert_eq!(ports.pending(PortId::new(0)), 0);
        assert_eq!(ports.pool().free_count(), 7);
    }

    #[test]
    fn test_serial_receive_posts_messages() {
        let mut ports = ports();
        let mut stream: Vec<u8, 256> = Vec::new();
        stream.extend_from_slice(&[0x00, 0x7E, 0x7E]).unwrap();
        stream
            .extend_from_slice(&wire(CommsPlane::SpiRadio0, SignalPlane::Control5, b"one")[1..])
            .unwrap();
        stream
            .extend_from_slice(&wire(CommsPlane::SpiRadio0, SignalPlane::Data5, b"two"))
            .unwrap();
        let mut port = ScriptedPort::new(&stream);
        let me = info(0, 0, 1, CommsPlane::SpiRadio0, SignalPlane::Control5);

        let mut service = SerialReceiveService::new();
        assert!(service.ready(&mut port));
        service.service(&me, &mut port, &mut ports);
        assert!(!service.ready(&mut port));
        assert_eq!(ports.pending(PortId::new(1)), 2);
        assert_eq!(service.dropped(), 0);
    }

    #[test]
    fn test_serial_transmit_resumes_when_port_stalls() {
        let mut ports = ports();
        let plane = PlaneAddress::new(CommsPlane::Uart, SignalPlane::Control0);
        ports.post_message(PortId::new(2), plane, &[0x7E, 0x01]).unwrap();
        ports.post_message(PortId::new(2), plane, b"AB").unwrap();
        let me = info(3, 2, 3, CommsPlane::Uart, SignalPlane::Control0);

        let mut port = ScriptedPort::new(&[]);
        port.tx_budget = 5;
        let mut service = SerialTransmitService::new();
        service.service(&me, &mut port, &mut ports);
        assert!(service.busy());
        assert_eq!(port.tx.len(), 5);
        assert!(!service.ready(&mut port));

        port.tx_budget = usize::MAX;
        assert!(service.ready(&mut port));
        service.service(&me, &mut port, &mut ports);
        assert!(!service.busy());
        assert_eq!(service.frames(), 2);

        let mut expected: Vec<u8, 64> = Vec::new();
        expected
            .extend_from_slice(&[0x7E, 0x03, 0x00, 0x1B, 0x7E, 0x01, 0x77, 0x3B, 0x7E])
            .unwrap();
        expected
            .extend_from_slice(&wire(CommsPlane::Uart, SignalPlane::Control0, b"AB"))
            .unwrap();
        assert_eq!(port.tx.as_slice(), expected.as_slice());
        assert_eq!(ports.pool().free_count(), 8);
    }
}
