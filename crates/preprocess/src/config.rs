/// Square network input used by the YOLOv4 export.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (416, 416);

/// Gray value written into the letterbox border.
pub const LETTERBOX_COLOR: u8 = 128;
