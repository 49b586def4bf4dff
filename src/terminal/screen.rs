// Text-mode cell grid shared by the live screen and private pages
use crate::config::{TEXT_COLUMNS, TEXT_ROWS};

const ROW_BYTES: usize = TEXT_COLUMNS * 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
}

/// Write one byte into `screen` at `cursor`, wrapping and scrolling.
pub fn put_byte(screen: &mut [u8], cursor: &mut Cursor, byte: u8, attribute: u8) {
    match byte {
        b'\n' => new_line(screen, cursor, attribute),
        0x08 => {
            if cursor.x > 0 {
                cursor.x -= 1;
            } else if cursor.y > 0 {
                cursor.y -= 1;
                cursor.x = TEXT_COLUMNS - 1;
            } else {
                return;
            }
            set_cell(screen, *cursor, b' ', attribute);
        }
        byte => {
            set_cell(screen, *cursor, byte, attribute);
            cursor.x += 1;
            if cursor.x >= TEXT_COLUMNS {
                new_line(screen, cursor, attribute);
            }
        }
    }
}

/// Blank every cell and home the cursor.
pub fn clear(screen: &mut [u8], cursor: &mut Cursor, attribute: u8) {
    for cell in screen.chunks_exact_mut(2) {
        cell[0] = b' ';
        cell[1] = attribute;
    }
    *cursor = Cursor::default();
}

fn new_line(screen: &mut [u8], cursor: &mut Cursor, attribute: u8) {
    cursor.x = 0;
    if cursor.y + 1 < TEXT_ROWS {
        cursor.y += 1;
        return;
    }
    screen.copy_within(ROW_BYTES..TEXT_ROWS * ROW_BYTES, 0);
    let last = (TEXT_ROWS - 1) * ROW_BYTES;
    for cell in screen[last..last + ROW_BYTES].chunks_exact_mut(2) {
        cell[0] = b' ';
        cell[1] = attribute;
    }
}

fn set_cell(screen: &mut [u8], cursor: Cursor, byte: u8, attribute: u8) {
    let offset = cursor.y * ROW_BYTES + cursor.x * 2;
    screen[offset] = byte;
    screen[offset + 1] = attribute;
}
