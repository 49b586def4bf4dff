#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use mpos::fs::BootImage;
use mpos::{machine, println, serial_println};
use x86_64::VirtAddr;

static FILESYSTEM: &[u8] = include_bytes!("../fs/filesys_img");

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static BootInfo) -> ! {
    println!("Welcome to mpos!");
    mpos::init();

    let Some(image) = BootImage::new(FILESYSTEM) else {
        panic!("boot filesystem image is malformed");
    };
    let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
    unsafe { machine::init_kernel(phys_mem_offset, image) };

    // The first timer tick starts the shell on terminal 0.
    x86_64::instructions::interrupts::enable();
    mpos::hlt_loop();
}

/// This function is called on panic.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();
    serial_println!("{}", info);
    println!("{}", info);
    mpos::hlt_loop();
}
