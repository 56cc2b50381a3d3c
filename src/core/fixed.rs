//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the lockstep simulation.
//! All operations use integer arithmetic only - no floats in gameplay logic.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ───┘└──── 16 bits ───┘                   │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every peer in a session runs the same `FRACTION_BITS`; a peer configured
//! differently is rejected at config validation, never mid-game. Overflow
//! saturates symmetrically to ±(2^31 - 1) so every peer lands on the same
//! value bit for bit.

/// Fixed-point number stored as i32.
/// `32 - FRACTION_BITS` bits integer, `FRACTION_BITS` bits fractional.
pub type Fixed = i32;

/// Number of fractional bits. The single precision configuration point:
/// `Config::validate` rejects any peer configured with a different value.
pub const FRACTION_BITS: u32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FRACTION_BITS;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Maximum representable value (saturation bound)
pub const FIXED_MAX: Fixed = i32::MAX;

/// Minimum representable value. Symmetric with `FIXED_MAX` so that
/// `fixed_abs` can never overflow.
pub const FIXED_MIN: Fixed = -i32::MAX;

/// Saturate a widened intermediate back into the symmetric Fixed range.
#[inline]
const fn saturate(wide: i64) -> Fixed {
    if wide > FIXED_MAX as i64 {
        FIXED_MAX
    } else if wide < FIXED_MIN as i64 {
        FIXED_MIN
    } else {
        wide as Fixed
    }
}

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in the tick loop.
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert an integer to fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    saturate((i as i64) << FRACTION_BITS)
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output. NEVER use the result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Truncate fixed-point to its integer part.
///
/// Arithmetic (sign-propagating) shift: rounds toward negative infinity,
/// identically on every platform.
#[inline]
pub const fn to_int(f: Fixed) -> i32 {
    f >> FRACTION_BITS
}

/// Add two fixed-point numbers, saturating on overflow.
#[inline]
pub const fn fixed_add(a: Fixed, b: Fixed) -> Fixed {
    saturate(a as i64 + b as i64)
}

/// Subtract two fixed-point numbers, saturating on overflow.
#[inline]
pub const fn fixed_sub(a: Fixed, b: Fixed) -> Fixed {
    saturate(a as i64 - b as i64)
}

/// Multiply two fixed-point numbers.
///
/// Widens to i64 before the shift so the intermediate cannot overflow,
/// then saturates back to the Fixed range. The right shift on i64 is
/// arithmetic, so negative products round toward negative infinity on
/// every peer.
#[inline]
pub const fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    saturate(wide >> FRACTION_BITS)
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts the numerator in i64 to maintain precision.
/// Returns 0 on divide-by-zero (deterministic, never panics).
#[inline]
pub const fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FRACTION_BITS;
    saturate(wide / b as i64)
}

/// Absolute value of a fixed-point number.
#[inline]
pub const fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 {
        saturate(-(x as i64))
    } else {
        x
    }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub const fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b {
        a
    } else {
        b
    }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub const fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b {
        a
    } else {
        b
    }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub const fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

// =============================================================================
// TESTS
// =============================================================================
