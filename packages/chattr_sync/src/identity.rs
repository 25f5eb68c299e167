//! Display identity derived from an agent handle.

/// Fallback colors for agents the server gives no color hint for.
const PALETTE: &[&str] = &[
    "#8b5cf6", // violet
    "#3b82f6", // blue
    "#10b981", // emerald
    "#f59e0b", // amber
    "#f43f5e", // rose
    "#06b6d4", // cyan
    "#f97316", // orange
    "#ec4899", // pink
];

/// First two characters of the display name, uppercased.
pub fn initials(display_name: &str) -> String {
    display_name.chars().take(2).collect::<String>().to_uppercase()
}

/// Stable color for a handle. Uses FNV-1a so the pick does not change between
/// builds or platforms.
pub fn color_for(handle: &str) -> &'static str {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in handle.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    PALETTE[hash as usize % PALETTE.len()]
}
