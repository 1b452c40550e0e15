#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock, interrupt::software::SoftwareInterruptControl, ram, timer::timg::TimerGroup,
};
use esp_println::println;

use gatelink::net::runtime;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 36 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0);

    match runtime::setup(peripherals.WIFI) {
        Ok(net) => {
            spawner.spawn(runtime::ap_net_task(net.ap_runner)).ok();
            spawner.spawn(runtime::sta_net_task(net.sta_runner)).ok();
            spawner.spawn(runtime::dhcp_server_task(net.ap_stack)).ok();
            spawner
                .spawn(runtime::supervisor_task(
                    net.controller,
                    net.ap_stack,
                    net.sta_stack,
                    peripherals.FLASH,
                ))
                .ok();
        }
        Err(err) => {
            // Nothing network-facing can run without the radio stack.
            println!("net: {}", err);
        }
    }

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
