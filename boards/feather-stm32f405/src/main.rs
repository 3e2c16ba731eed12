#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod serial;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [SPI1, SPI2])]
mod app {
    use super::*;
    use defmt::{error, info, warn};
    use embassy_stm32::gpio::{Level, Output, Speed};
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::time::Hertz;
    use embassy_stm32::usart::Uart;
    use static_cell::StaticCell;

    use planelink_core::config::{LinkConfig, TimerConfig, DURATION_TIMER_COUNT, LAYER_POOL_SIZE};
    use planelink_core::frame::{CommsPlane, SignalPlane};
    use planelink_core::messaging::{
        ComponentHandler, FrameReceiveService, MessageExchange, MessagePorts, MessagingLayerManager,
        PlaneRouter, PortId, SerialTransmitService,
    };
    use planelink_core::ring_buffer::RING_BUFFER_MAX_LENGTH;
    use planelink_core::timer::{DurationTimerService, StrobeCallback, TickSource, TimerKind};
    use planelink_core::{crc, critical_region, RingBuffer};
    use planelink_hal::PinLine;

    use serial::UsartPort;

    /// Raw bytes from the receive interrupt
    const RX_RAW: PortId = PortId::new(0);
    /// De-framed messages awaiting routing
    const RX_MESSAGES: PortId = PortId::new(1);
    /// Messages queued for the USART
    const TX_MESSAGES: PortId = PortId::new(2);
    /// Layer port of the transmitter (nothing consumes it)
    const TX_DONE: PortId = PortId::new(3);
    const PORT_COUNT: usize = 4;

    /// Receive, route, transmit
    const COMPONENT_COUNT: usize = 3;

    const HEARTBEAT_INTERVAL_US: u32 = 500_000;

    type Ports = MessagePorts<PORT_COUNT, LAYER_POOL_SIZE>;
    type Manager = MessagingLayerManager<'static, COMPONENT_COUNT>;
    type Heartbeat = StrobeCallback<PinLine<Output<'static>>>;
    type Timers = DurationTimerService<Heartbeat, DURATION_TIMER_COUNT>;

    #[shared]
    struct Shared {
        /// Bytes received but not yet handed to the messaging layer
        rx_ring: RingBuffer,
    }

    #[local]
    struct Local {
        manager: Manager,
        ports: Ports,
        timers: Timers,
        rx_overruns: u32,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Planelink starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("System initialized: SYSCLK=84MHz");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);

        if !crc::self_test() {
            defmt::panic!("CRC engine self test failed");
        }

        let link_config = LinkConfig::default();
        let ports = match Ports::new(&link_config) {
            Ok(ports) => ports,
            Err(e) => defmt::panic!("message ports: {}", e),
        };
        let rx_ring = match RingBuffer::initialise(link_config.ring_length) {
            Ok(ring) => ring,
            Err(e) => defmt::panic!("receive ring: {}", e),
        };

        let uart = match Uart::new_blocking(p.USART3, p.PB11, p.PB10, UsartPort::config()) {
            Ok(uart) => uart,
            Err(e) => defmt::panic!("USART3 config: {}", e),
        };
        info!("USART3 link at {} baud", serial::BAUD_RATE);

        static RECEIVE: StaticCell<FrameReceiveService> = StaticCell::new();
        static ROUTER: StaticCell<PlaneRouter> = StaticCell::new();
        static TRANSMIT: StaticCell<SerialTransmitService> = StaticCell::new();
        static USART: StaticCell<UsartPort> = StaticCell::new();

        let manager = match build_manager(
            RECEIVE.init(FrameReceiveService::new()),
            ROUTER.init(PlaneRouter::new()),
            TRANSMIT.init(SerialTransmitService::new()),
            USART.init(UsartPort::new(uart)),
        ) {
            Ok(manager) => manager,
            Err(e) => defmt::panic!("messaging layer: {}", e),
        };

        let mut timers = Timers::new(TimerConfig::default());
        let led = PinLine::new(Output::new(p.PC1, Level::High, Speed::Low));
        if let Err(e) = timers.assign(
            StrobeCallback::new(led),
            TimerKind::Periodic,
            HEARTBEAT_INTERVAL_US,
            TickSource::SystemTick,
        ) {
            warn!("heartbeat timer not armed: {}", e);
        }

        serial::listen_rx(true);
        system_tick::spawn().ok();

        (
            Shared { rx_ring },
            Local {
                manager,
                ports,
                timers,
                rx_overruns: 0,
            },
        )
    }

    fn build_manager(
        receive: &'static mut FrameReceiveService,
        router: &'static mut PlaneRouter,
        transmit: &'static mut SerialTransmitService,
        usart: &'static mut UsartPort,
    ) -> Result<Manager, planelink_core::LinkError> {
        let mut manager = Manager::initialise()?;
        manager.load(
            0,
            RX_RAW,
            RX_MESSAGES,
            CommsPlane::Usart2,
            SignalPlane::Data0,
            ComponentHandler::layer(receive),
        )?;
        manager.load(
            1,
            RX_MESSAGES,
            TX_MESSAGES,
            CommsPlane::Usart2,
            SignalPlane::Control0,
            ComponentHandler::layer(router),
        )?;
        manager.load(
            2,
            TX_MESSAGES,
            TX_DONE,
            CommsPlane::Usart2,
            SignalPlane::Data0,
            ComponentHandler::hardware(usart, transmit),
        )?;
        for index in 0..COMPONENT_COUNT {
            manager.mark_ready(index)?;
        }
        Ok(manager)
    }

    /// USART3 receive interrupt
    ///
    /// Runs with `rx_ring` locked by priority, so the ring is loaded
    /// unguarded.
    #[task(binds = USART3, priority = 3, shared = [rx_ring], local = [rx_overruns])]
    fn usart3_rx(mut cx: usart3_rx::Context) {
        let (byte, overrun) = serial::read_rx();
        if overrun {
            *cx.local.rx_overruns += 1;
        }
        if let Some(byte) = byte {
            let loaded = cx.shared.rx_ring.lock(|ring| ring.load_bytes(&[byte], false));
            if loaded == 0 {
                *cx.local.rx_overruns += 1;
            }
        }
    }

    /// Duration timer tick, one per system tick period
    #[task(priority = 2, local = [timers])]
    async fn system_tick(cx: system_tick::Context) {
        let period = u64::from(cx.local.timers.config().system_tick_period_us);
        let mut next = Mono::now();
        loop {
            next += period.micros();
            Mono::delay_until(next).await;
            cx.local.timers.tick();
        }
    }

    /// Background loop: move received bytes into the messaging layer and poll it
    #[idle(shared = [rx_ring], local = [manager, ports])]
    fn idle(mut cx: idle::Context) -> ! {
        info!("Idle task started - polling messaging layer");
        let mut raw = [0u8; RING_BUFFER_MAX_LENGTH];
        loop {
            let count = cx.shared.rx_ring.lock(|ring| ring.unload_bytes(&mut raw, false));
            if count > 0 {
                let accepted = cx.local.ports.append_bytes(RX_RAW, &raw[..count]);
                if accepted < count {
                    warn!("receive path dropped {} bytes", count - accepted);
                }
            }

            // No WFI: the transmitter is polled on TXE, which raises no interrupt
            cx.local.manager.poll(&mut *cx.local.ports);

            if critical_region::fault_raised() {
                error!("buffer pool accounting violated");
                defmt::panic!("link fault");
            }
        }
    }
}
