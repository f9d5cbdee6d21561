//! COM1 output for the bare-metal console.
//!
//! https://wiki.osdev.org/Serial_Ports

use core::{arch::asm, fmt};

const COM1: u16 = 0x3f8;
const DATA: u16 = COM1;
const INTERRUPT_ENABLE: u16 = COM1 + 1;
const FIFO_CONTROL: u16 = COM1 + 2;
const LINE_CONTROL: u16 = COM1 + 3;
const MODEM_CONTROL: u16 = COM1 + 4;
const LINE_STATUS: u16 = COM1 + 5;

const TRANSMIT_EMPTY: u8 = 0x20;
const LOOPBACK_PROBE: u8 = 0xAE;

#[derive(Clone, Copy, PartialEq, Eq)]
enum PortState {
    Uninitialized,
    Ready,
    Faulty,
}

pub struct SerialWriter {
    state: PortState,
}

unsafe fn outb(port: u16, byte: u8) {
    asm!("out dx, al", in("dx") port, in("al") byte)
}

unsafe fn inb(port: u16) -> u8 {
    let res: u8;
    asm!("in al, dx", in("dx") port, out("al") res);
    res
}

impl SerialWriter {
    fn probe(&mut self) -> PortState {
        if self.state != PortState::Uninitialized {
            return self.state;
        }

        // SAFETY: Standard 16550 bring-up sequence: 38400 baud, 8N1, FIFO on.
        let echoed = unsafe {
            outb(INTERRUPT_ENABLE, 0x00);
            outb(LINE_CONTROL, 0x80);
            outb(DATA, 0x03);
            outb(INTERRUPT_ENABLE, 0x00);
            outb(LINE_CONTROL, 0x03);
            outb(FIFO_CONTROL, 0xC7);
            outb(MODEM_CONTROL, 0x1E);
            outb(DATA, LOOPBACK_PROBE);
            let echoed = inb(DATA);
            outb(MODEM_CONTROL, 0x0F);
            echoed
        };

        // A machine without a working port still boots, it just stays quiet.
        self.state = if echoed == LOOPBACK_PROBE {
            PortState::Ready
        } else {
            PortState::Faulty
        };
        self.state
    }
}

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.probe() == PortState::Faulty {
            return Ok(());
        }

        for b in s.bytes() {
            // SAFETY: Waits for the transmit holding register to drain first.
            unsafe {
                while inb(LINE_STATUS) & TRANSMIT_EMPTY == 0 {
                    core::hint::spin_loop();
                }
                outb(DATA, b);
            }
        }

        Ok(())
    }
}

pub static mut SERIAL_WRITER: SerialWriter = SerialWriter {
    state: PortState::Uninitialized,
};
