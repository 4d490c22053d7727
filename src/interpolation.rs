//! VMD keyframe interpolation curves.
//!
//! Each curve is a cubic Bézier from (0, 0) to (1, 1) with two control points
//! stored as bytes in `0..=127`.

/// Control bytes MMD writes for a straight line.
pub const LINEAR_CONTROL_BYTES: [u8; 4] = [20, 20, 107, 107];

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BezierCurve {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl BezierCurve {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn linear() -> Self {
        Self::from_bytes(LINEAR_CONTROL_BYTES)
    }

    /// `[x1, y1, x2, y2]`, each divided by 127
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            x1: f32::from(bytes[0]) / 127.0,
            y1: f32::from(bytes[1]) / 127.0,
            x2: f32::from(bytes[2]) / 127.0,
            y2: f32::from(bytes[3]) / 127.0,
        }
    }

    /// Both control points lie on the diagonal, so `evaluate(t) == t`.
    pub fn is_linear(&self) -> bool {
        (self.x1 - self.y1).abs() < 1e-6 && (self.x2 - self.y2).abs() < 1e-6
    }

    /// Progress along the value for progress `t` along the frame span.
    ///
    /// Solves `x(s) = t` with Newton iterations, then returns `y(s)`.
    pub fn evaluate(&self, t: f32) -> f32 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        let mut s = t;
        for _ in 0..15 {
            let x = self.bezier_x(s);
            let dx = self.bezier_dx(s);
            if dx.abs() < 1e-6 {
                break;
            }
            let next = (s - (x - t) / dx).clamp(0.0, 1.0);
            if (next - s).abs() < 1e-6 {
                s = next;
                break;
            }
            s = next;
        }
        self.bezier_y(s)
    }

    fn bezier_x(&self, s: f32) -> f32 {
        cubic(self.x1, self.x2, s)
    }

    fn bezier_y(&self, s: f32) -> f32 {
        cubic(self.y1, self.y2, s)
    }

    fn bezier_dx(&self, s: f32) -> f32 {
        let t = 1.0 - s;
        3.0 * t * t * self.x1 + 6.0 * t * s * (self.x2 - self.x1) + 3.0 * s * s * (1.0 - self.x2)
    }
}

fn cubic(p1: f32, p2: f32, s: f32) -> f32 {
    let t = 1.0 - s;
    3.0 * t * t * s * p1 + 3.0 * t * s * s * p2 + s * s * s
}

/// Channels of the bone interpolation block, in block order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BoneChannel {
    X = 0,
    Y = 1,
    Z = 2,
    Rotation = 3,
}

/// The four curves of a bone keyframe.
///
/// The 64-byte block is four rows of 16 bytes. Row `c` starts with the curve
/// of channel `c` at stride 4: `x1, y1, x2, y2` at `16c, 16c+4, 16c+8, 16c+12`.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct BoneInterpolation {
    pub x: BezierCurve,
    pub y: BezierCurve,
    pub z: BezierCurve,
    pub rotation: BezierCurve,
}

impl BoneInterpolation {
    pub fn from_block(block: &[u8; 64]) -> Self {
        let curve = |channel| BezierCurve::from_bytes(bone_channel_bytes(block, channel));
        Self {
            x: curve(BoneChannel::X),
            y: curve(BoneChannel::Y),
            z: curve(BoneChannel::Z),
            rotation: curve(BoneChannel::Rotation),
        }
    }

    pub fn channel(&self, channel: BoneChannel) -> &BezierCurve {
        match channel {
            BoneChannel::X => &self.x,
            BoneChannel::Y => &self.y,
            BoneChannel::Z => &self.z,
            BoneChannel::Rotation => &self.rotation,
        }
    }

    /// translation curves in X, Y, Z order
    pub fn translation(&self) -> [BezierCurve; 3] {
        [self.x, self.y, self.z]
    }
}

/// raw `[x1, y1, x2, y2]` of one channel
pub fn bone_channel_bytes(block: &[u8; 64], channel: BoneChannel) -> [u8; 4] {
    let row = 16 * channel as usize;
    [block[row], block[row + 4], block[row + 8], block[row + 12]]
}

/// Encodes four curves the way MMD writes them: the first row interleaves the
/// channels, every further row is the first one shifted left by its row number.
pub fn encode_bone_block(curves: [[u8; 4]; 4]) -> [u8; 64] {
    let mut first = [0_u8; 16];
    for (channel, bytes) in curves.iter().enumerate() {
        for (i, &byte) in bytes.iter().enumerate() {
            first[4 * i + channel] = byte;
        }
    }
    let mut block = [0_u8; 64];
    for row in 0..4 {
        block[16 * row..16 * row + 16 - row].copy_from_slice(&first[row..]);
    }
    block
}

/// The six curves of a camera keyframe, each stored as 4 consecutive bytes
/// `x1, x2, y1, y2` in the 24-byte block.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct CameraInterpolation {
    pub x: BezierCurve,
    pub y: BezierCurve,
    pub z: BezierCurve,
    pub rotation: BezierCurve,
    pub distance: BezierCurve,
    pub fov: BezierCurve,
}

impl CameraInterpolation {
    pub fn from_block(block: &[u8; 24]) -> Self {
        let curve = |i: usize| {
            let b = &block[4 * i..4 * i + 4];
            BezierCurve::from_bytes([b[0], b[2], b[1], b[3]])
        };
        Self {
            x: curve(0),
            y: curve(1),
            z: curve(2),
            rotation: curve(3),
            distance: curve(4),
            fov: curve(5),
        }
    }
}
