//! CAN/HTTP node - ESP32 firmware on a CAN bus and a WiFi network at once.
//!
//! Architecture:
//! - Core 0: boot sequence, WiFi connection task, `embassy-net` runner and the
//!   sender activity (CAN heartbeat + periodic HTTP sample)
//! - Core 1: the receiver activity, so IP work never shares a CPU with CAN
//!   reception
//!
//! The link supervisor's state is the only coupling between the WiFi side and
//! the sender; the CAN plane is shared through a critical-section mutex.

#![no_std]
#![no_main]

use esp_bootloader_esp_idf::esp_app_desc;
esp_app_desc!();

mod can;
mod config;
mod http;
mod link;
mod net;
mod node;
mod publisher;
mod storage;
mod twai;
mod wifi;

extern crate alloc;

use core::fmt;
use core::mem::MaybeUninit;

use embassy_executor::Spawner;
use embassy_net::StackResources;
use embassy_time::{Duration, Timer};
use esp_alloc as _;
use esp_hal::{
    clock::CpuClock,
    gpio::AnyPin,
    interrupt::software::SoftwareInterruptControl,
    peripherals::{CPU_CTRL, SW_INTERRUPT, TWAI0, WIFI},
    rng::Rng,
    system::Stack as CpuStack,
    timer::timg::TimerGroup,
};
use esp_println::logger::init_logger;
use esp_rtos::embassy::Executor;
use esp_storage::FlashStorage;
use rand_core::RngCore;
use static_cell::StaticCell;

use crate::can::{CanConfig, CanError, CanPlane, NodeId};
use crate::config::{Config, TAG};
use crate::http::Endpoint;
use crate::link::LinkSupervisor;
use crate::net::NetHttpClient;
use crate::node::{wait_for_mode, ReceiverActivity, SenderActivity};
use crate::publisher::Publisher;
use crate::storage::{StorageError, RECORD_OFFSET};
use crate::twai::TwaiDriver;

// Core 1 only runs the receiver loop.
static mut CORE1_STACK: CpuStack<8192> = CpuStack::new();

static LINK: LinkSupervisor = LinkSupervisor::new();
static CAN: StaticCell<CanPlane<TwaiDriver>> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static CORE1_EXECUTOR: StaticCell<Executor> = StaticCell::new();

const FATAL_RESET_DELAY: Duration = Duration::from_secs(3);

/// Anything that stops the node from booting.
#[derive(Debug)]
enum BootError {
    Storage(StorageError),
    Can(CanError),
    /// Compiled-in configuration cannot be used.
    Config(&'static str),
    Radio,
    Spawn,
}

impl From<StorageError> for BootError {
    fn from(e: StorageError) -> Self {
        BootError::Storage(e)
    }
}

impl From<CanError> for BootError {
    fn from(e: CanError) -> Self {
        BootError::Can(e)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Storage(e) => write!(f, "storage: {}", e),
            BootError::Can(e) => write!(f, "can: {}", e),
            BootError::Config(what) => write!(f, "config: {}", what),
            BootError::Radio => write!(f, "radio init failed"),
            BootError::Spawn => write!(f, "task spawn failed"),
        }
    }
}

/// Hardware RNG behind `rand_core`. Only random once the radio is up.
struct HwRng(Rng);

impl RngCore for HwRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[embassy_executor::task]
async fn sender_task(
    can: &'static CanPlane<TwaiDriver>,
    stack: embassy_net::Stack<'static>,
    endpoint: Endpoint,
    node: NodeId,
    rng: HwRng,
) {
    let publisher = Publisher::new(&LINK, NetHttpClient::new(stack), endpoint);
    SenderActivity::new(can, publisher, rng, node).run().await;
}

#[embassy_executor::task]
async fn receiver_task(can: &'static CanPlane<TwaiDriver>, node: NodeId) {
    ReceiverActivity::new(can, node).run().await;
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    init_logger(log::LevelFilter::Info);
    log::info!(target: TAG, "CAN/HTTP node starting...");

    // Initialize heap (WiFi driver and JSON bodies)
    const HEAP_SIZE: usize = 72 * 1024;
    static mut HEAP: MaybeUninit<[u8; HEAP_SIZE]> = MaybeUninit::uninit();
    unsafe {
        esp_alloc::HEAP.add_region(esp_alloc::HeapRegion::new(
            core::ptr::addr_of_mut!(HEAP) as *mut u8,
            HEAP_SIZE,
            esp_alloc::MemoryCapability::Internal.into(),
        ));
    }

    // Hardware init
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Start the esp-rtos scheduler (required before esp_radio::init)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let board = Board {
        wifi: peripherals.WIFI,
        twai: peripherals.TWAI0,
        can_tx: peripherals.GPIO21.into(),
        can_rx: peripherals.GPIO22.into(),
        sw_interrupt: peripherals.SW_INTERRUPT,
        cpu_ctrl: peripherals.CPU_CTRL,
    };

    if let Err(e) = boot(spawner, board).await {
        fatal(e).await;
    }

    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

/// Peripherals the boot sequence hands out.
struct Board {
    wifi: WIFI<'static>,
    twai: TWAI0<'static>,
    can_tx: AnyPin<'static>,
    can_rx: AnyPin<'static>,
    sw_interrupt: SW_INTERRUPT<'static>,
    cpu_ctrl: CPU_CTRL<'static>,
}

async fn boot(spawner: Spawner, board: Board) -> Result<(), BootError> {
    let config = Config::get();
    let endpoint = Endpoint::parse(config.server_ip, config.server_port)
        .ok_or(BootError::Config("HTTP_SERVER_IP is not an IPv4 address"))?;
    if option_env!("NODE_ID").is_some() && config.node_id.is_none() {
        return Err(BootError::Config("NODE_ID is not a valid CAN identifier"));
    }

    // 1. Identity from flash
    let mut flash = FlashStorage::new();
    let record = storage::provision(&mut flash, RECORD_OFFSET, config.node_id)?;
    let node = NodeId::new(record.node_id)
        .ok_or(BootError::Config("stored node id out of range"))?;
    log::info!(
        target: TAG,
        "boot: node id {} ({})",
        node,
        if node.is_extended() { "extended" } else { "standard" }
    );

    // 2. WiFi link
    let radio = RADIO.init(esp_radio::init().map_err(|e| {
        log::error!(target: TAG, "boot: radio init: {:?}", e);
        BootError::Radio
    })?);
    let (controller, interfaces) = esp_radio::wifi::new(radio, board.wifi, Default::default())
        .map_err(|e| {
            log::error!(target: TAG, "boot: wifi init: {:?}", e);
            BootError::Radio
        })?;

    // 3. Random source
    let mut rng = HwRng(Rng::new());
    let seed = (rng.next_u32() as u64) << 32 | rng.next_u32() as u64;

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(wifi::net_task(runner)).map_err(|_| BootError::Spawn)?;

    LINK.start();
    spawner
        .spawn(wifi::connection(controller, stack, &LINK, config.ssid, config.password))
        .map_err(|_| BootError::Spawn)?;

    // 4. CAN plane (TX GPIO21, RX GPIO22)
    let driver = TwaiDriver::new(board.twai, board.can_rx, board.can_tx);
    let can: &'static CanPlane<TwaiDriver> =
        CAN.init(CanPlane::install(driver, &CanConfig::default())?);
    can.start()?;

    // 5. Wait for the link to settle
    let mode = wait_for_mode(&LINK).await;

    // 6./7. Receiver always, sender only with a working link
    let sw_ints = SoftwareInterruptControl::new(board.sw_interrupt);
    esp_rtos::start_second_core(
        board.cpu_ctrl,
        sw_ints.software_interrupt0,
        sw_ints.software_interrupt1,
        unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK) },
        move || {
            let executor = CORE1_EXECUTOR.init(Executor::new());
            executor.run(|spawner| {
                if spawner.spawn(receiver_task(can, node)).is_err() {
                    log::error!(target: TAG, "boot: receiver spawn failed");
                }
            });
        },
    );

    if mode.runs_sender() {
        spawner
            .spawn(sender_task(can, stack, endpoint, node, rng))
            .map_err(|_| BootError::Spawn)?;
    }

    log::info!(target: TAG, "boot: complete ({:?})", mode);
    Ok(())
}

async fn fatal(e: BootError) -> ! {
    log::error!(target: TAG, "boot: fatal: {}", e);
    Timer::after(FATAL_RESET_DELAY).await;
    esp_hal::system::software_reset()
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    critical_section::with(|_| {
        log::error!(target: TAG, "PANIC: {}", info);
    });

    esp_hal::system::software_reset()
}
