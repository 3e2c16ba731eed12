//! Messaging-layer components
//!
//! A component binds a handler to a comms-plane/signal-plane pair and two
//! ports: its "server" port (where its input buffers arrive) and its
//! "layer" port (where it posts its output). The manager polls every loaded
//! component once per background-loop pass.
//!
//! Handlers come in two kinds. A layer handler only moves buffers between
//! ports. A hardware handler additionally owns exactly one `CharacterPort`;
//! there is no way to build a handler that terminates two hardware
//! endpoints.
//!
//! # Poll order
//!
//! Readiness for every component is decided before any handler runs. A
//! component that becomes ready because an earlier handler in the same pass
//! posted to its server port waits for the next pass, so a fast
//! producer/consumer pair is serviced exactly once per pass regardless of
//! slot order.

mod ports;
mod services;

pub use ports::{MessageExchange, MessagePorts, PortId};
pub use services::{FrameReceiveService, PlaneRouter, SerialReceiveService, SerialTransmitService};

use planelink_hal::CharacterPort;

use crate::error::LinkError;
use crate::frame::{CommsPlane, PlaneAddress, SignalPlane};

/// Static description of one loaded component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComponentInfo {
    pub index: usize,
    pub comms: CommsPlane,
    pub signal: SignalPlane,
    /// Port the component consumes
    pub server: PortId,
    /// Port the component produces into
    pub layer: PortId,
}

impl ComponentInfo {
    pub fn plane(&self) -> PlaneAddress {
        PlaneAddress::new(self.comms, self.signal)
    }
}

/// Handler moving buffers between ports only
pub trait LayerService {
    /// Service pending work
    ///
    /// `components` is the manager's whole table, unloaded slots included.
    fn service(
        &mut self,
        component: &ComponentInfo,
        components: &[Option<ComponentInfo>],
        exchange: &mut dyn MessageExchange,
    );
}

/// Handler terminating one hardware source or sink
pub trait HardwareService {
    /// Work pending on the hardware side, independent of the server port
    fn ready(&mut self, port: &mut dyn CharacterPort) -> bool {
        let _ = port;
        false
    }

    fn service(
        &mut self,
        component: &ComponentInfo,
        port: &mut dyn CharacterPort,
        exchange: &mut dyn MessageExchange,
    );
}

/// A component's handler
pub enum ComponentHandler<'a> {
    Hardware {
        port: &'a mut dyn CharacterPort,
        service: &'a mut dyn HardwareService,
    },
    Layer(&'a mut dyn LayerService),
}

impl<'a> ComponentHandler<'a> {
    pub fn hardware(port: &'a mut dyn CharacterPort, service: &'a mut dyn HardwareService) -> Self {
        Self::Hardware { port, service }
    }

    pub fn layer(service: &'a mut dyn LayerService) -> Self {
        Self::Layer(service)
    }

    fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware { .. })
    }
}

/// Table of `C` components polled from the background loop
pub struct MessagingLayerManager<'a, const C: usize> {
    components: [Option<ComponentInfo>; C],
    handlers: [Option<ComponentHandler<'a>>; C],
    enabled: [bool; C],
}

impl<'a, const C: usize> MessagingLayerManager<'a, C> {
    /// Create a table with every slot unloaded
    ///
    /// # Errors
    ///
    /// Returns `LinkError::NullOrMissingParameter` if `C == 0`.
    pub fn initialise() -> Result<Self, LinkError> {
        if C == 0 {
            return Err(LinkError::NullOrMissingParameter);
        }
        Ok(Self {
            components: [None; C],
            handlers: core::array::from_fn(|_| None),
            enabled: [false; C],
        })
    }

    /// Bind a component to slot `index`
    ///
    /// The component is not polled until `mark_ready`.
    ///
    /// # Errors
    ///
    /// - `LinkError::ParameterOutOfRange` if `index >= C`
    /// - `LinkError::DefinitionError` if the slot is already loaded
    pub fn load(
        &mut self,
        index: usize,
        server: PortId,
        layer: PortId,
        comms: CommsPlane,
        signal: SignalPlane,
        handler: ComponentHandler<'a>,
    ) -> Result<(), LinkError> {
        let slot = self
            .components
            .get_mut(index)
            .ok_or(LinkError::ParameterOutOfRange)?;
        if slot.is_some() {
            return Err(LinkError::DefinitionError);
        }

        info!(
            "component {} loaded: {} {} server={} layer={} hardware={}",
            index,
            comms,
            signal,
            server.index(),
            layer.index(),
            handler.is_hardware()
        );
        *slot = Some(ComponentInfo {
            index,
            comms,
            signal,
            server,
            layer,
        });
        self.handlers[index] = Some(handler);
        self.enabled[index] = false;
        Ok(())
    }

    /// Allow a loaded component to be polled
    ///
    /// # Errors
    ///
    /// - `LinkError::ParameterOutOfRange` if `index >= C`
    /// - `LinkError::DefinitionError` if the slot is not loaded
    pub fn mark_ready(&mut self, index: usize) -> Result<(), LinkError> {
        match self.components.get(index) {
            None => Err(LinkError::ParameterOutOfRange),
            Some(None) => Err(LinkError::DefinitionError),
            Some(Some(_)) => {
                self.enabled[index] = true;
                Ok(())
            }
        }
    }

    /// Remove a component, handing its handler back
    pub fn unload(&mut self, index: usize) -> Option<ComponentHandler<'a>> {
        self.components.get_mut(index)?.take()?;
        self.enabled[index] = false;
        self.handlers[index].take()
    }

    pub fn component(&self, index: usize) -> Option<&ComponentInfo> {
        self.components.get(index)?.as_ref()
    }

    pub fn loaded_count(&self) -> usize {
        self.components.iter().flatten().count()
    }

    /// Run one background-loop pass
    ///
    /// Returns the number of handlers invoked.
    pub fn poll(&mut self, exchange: &mut dyn MessageExchange) -> usize {
        let mut ready = [false; C];
        for (index, flag) in ready.iter_mut().enumerate() {
            let (Some(info), true) = (&self.components[index], self.enabled[index]) else {
                continue;
            };
            *flag = exchange.pending(info.server) > 0
                || match &mut self.handlers[index] {
                    Some(ComponentHandler::Hardware { port, service }) => {
                        service.ready(&mut **port)
                    }
                    _ => false,
                };
        }

        let mut serviced = 0;
        for index in (0..C).filter(|&i| ready[i]) {
            let (Some(info), Some(handler)) = (&self.components[index], &mut self.handlers[index])
            else {
                continue;
            };
            match handler {
                ComponentHandler::Hardware { port, service } => {
                    service.service(info, &mut **port, exchange)
                }
                ComponentHandler::Layer(service) => {
                    service.service(info, &self.components, exchange)
                }
            }
            serviced += 1;
        }
        serviced
    }
}
