use std::fmt::Display;
use std::ops::Deref;

/// 默认的 frames in flight 数量
///
/// 各个 per-frame 数组（context 数组、CommandRing 的上限）默认使用这个值，
/// 调用方可以在创建时覆盖。
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 3;

/// in-flight 帧槽位的标签：A, B, C, ...
///
/// 帧编号对 frames in flight 取模得到槽位，debug name 和日志里
/// 用字母标识槽位比裸下标更好认
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FifLabel(usize);

impl FifLabel {
    /// 帧编号换算成槽位标签，按调用方实际的 frames in flight 回绕
    #[inline]
    pub fn from_usize(frame_index: usize, frames_in_flight: usize) -> Self {
        debug_assert!(frames_in_flight > 0);
        Self(frame_index % frames_in_flight.max(1))
    }
}

impl Deref for FifLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for FifLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        match LETTERS.get(self.0) {
            Some(&letter) => write!(f, "{}", letter as char),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_wraps_by_caller_bound() {
        assert_eq!(FifLabel::from_usize(0, DEFAULT_FRAMES_IN_FLIGHT), FifLabel(0));
        assert_eq!(FifLabel::from_usize(4, DEFAULT_FRAMES_IN_FLIGHT), FifLabel(1));
        // 回绕尊重调用方覆盖后的 frames in flight
        assert_eq!(FifLabel::from_usize(4, 2), FifLabel(0));
        assert_eq!(FifLabel::from_usize(5, 4), FifLabel(1));
        assert_eq!(*FifLabel::from_usize(5, DEFAULT_FRAMES_IN_FLIGHT), 2);
    }

    #[test]
    fn test_frame_label_display() {
        assert_eq!(FifLabel::from_usize(0, 3).to_string(), "A");
        assert_eq!(FifLabel::from_usize(2, 3).to_string(), "C");
        assert_eq!(FifLabel::from_usize(3, 4).to_string(), "D");
        // 超出字母表时退回数字
        assert_eq!(FifLabel(30).to_string(), "30");
    }
}
