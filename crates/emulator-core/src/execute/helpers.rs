//! Arithmetic and shift primitives shared by the native and bytecode interpreters.

/// `AddWithCarry(x, y, carry_in)` returning `(result, carry, overflow)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const fn add_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    let unsigned = x as u64 + y as u64 + carry_in as u64;
    let signed = x as i32 as i64 + y as i32 as i64 + carry_in as i64;
    let result = unsigned as u32;
    (
        result,
        unsigned >> 32 != 0,
        result as i32 as i64 != signed,
    )
}

/// `x - y` with ARM borrow semantics (`C` set when no borrow).
#[must_use]
pub const fn sub_with_flags(x: u32, y: u32) -> (u32, bool, bool) {
    add_with_carry(x, !y, true)
}

/// `LSL` by an amount in `0..=255`, returning `(result, carry_out)`.
#[must_use]
pub const fn shift_left(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
        32 => (0, value & 1 != 0),
        _ => (0, false),
    }
}

/// `LSR` by an amount in `0..=255`, returning `(result, carry_out)`.
#[must_use]
pub const fn shift_right(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
        32 => (0, value & 0x8000_0000 != 0),
        _ => (0, false),
    }
}

/// `Align(value, 4)`.
#[must_use]
pub const fn align4(value: u32) -> u32 {
    value & !0x3
}

/// Applies a signed byte offset to an address.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn offset_address(base: u32, offset: i32) -> u32 {
    base.wrapping_add(offset as u32)
}
