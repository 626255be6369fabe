//! 外部协作者
//!
//! 语音识别、语音合成与对话生成由外部服务提供，这里只定义接口。
//! 调用在控制器的调用方线程中同步执行。

use dashan_protocol::AudioHeader;
use std::time::Duration;

/// 合成后的语音
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeechAudio {
    pub header: AudioHeader,
    pub pcm: Vec<u8>,
    /// 估计播放时长，到期后触发 `SpeechFinished`
    pub duration: Duration,
}

impl SpeechAudio {
    /// 16 kHz 单声道 PCM16，按采样数估计时长
    pub fn pcm16_mono(pcm: Vec<u8>) -> Self {
        let header = AudioHeader::default();
        let bytes_per_second = header.sample_rate as u64 * 2 * header.channels as u64;
        let duration = Duration::from_millis(pcm.len() as u64 * 1000 / bytes_per_second);
        Self { header, pcm, duration }
    }
}

pub trait SpeechToText: Send + Sync {
    /// 识别失败或无语音时返回 `None`
    fn transcribe(&self, audio: &[u8]) -> Option<String>;
}

pub trait TextToSpeech: Send + Sync {
    fn synthesize(&self, text: &str) -> Option<SpeechAudio>;
}

pub trait DialogueEngine: Send + Sync {
    /// 空字符串表示结束对话
    fn respond(&self, text: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_duration() {
        let audio = SpeechAudio::pcm16_mono(vec![0; 16_000]);
        assert_eq!(audio.duration, Duration::from_millis(500));
        assert_eq!(audio.header.sample_rate, 16_000);
    }
}
