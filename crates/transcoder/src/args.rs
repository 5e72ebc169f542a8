//! ffmpeg argument profiles for audio extraction.

use wavetap_core::request::StreamRequest;
use wavetap_core::types::AudioFormat;

pub const AAC_BITRATE: &str = "128k";
pub const OPUS_BITRATE: &str = "96k";
pub const OUTPUT_CHANNELS: &str = "2";
pub const OUTPUT_SAMPLE_RATE: &str = "48000";

/// How the source audio reaches the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioHandling {
    /// Source audio is already compatible; remux only.
    Copy,
    Encode,
}

/// Build the full ffmpeg argument list for one request. Output always goes to stdout.
pub fn build_args(
    request: &StreamRequest,
    handling: AudioHandling,
    reconnect_delay_max_secs: u32,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    // Upstream may be a long-lived network stream
    args.extend([
        "-reconnect".into(),
        "1".into(),
        "-reconnect_streamed".into(),
        "1".into(),
        "-reconnect_on_network_error".into(),
        "1".into(),
        "-reconnect_delay_max".into(),
        reconnect_delay_max_secs.to_string(),
    ]);

    args.extend(["-i".into(), request.source_url().to_string()]);

    // Audio only, no container metadata
    args.extend([
        "-map".into(),
        "0:a:0".into(),
        "-vn".into(),
        "-sn".into(),
        "-dn".into(),
        "-map_metadata".into(),
        "-1".into(),
        "-map_chapters".into(),
        "-1".into(),
        "-t".into(),
        request.max_duration_secs().to_string(),
    ]);

    match request.format() {
        AudioFormat::M4a => {
            match handling {
                AudioHandling::Copy => args.extend(["-c:a".into(), "copy".into()]),
                AudioHandling::Encode => args.extend([
                    "-c:a".into(),
                    "aac".into(),
                    "-b:a".into(),
                    AAC_BITRATE.into(),
                    "-ac".into(),
                    OUTPUT_CHANNELS.into(),
                    "-ar".into(),
                    OUTPUT_SAMPLE_RATE.into(),
                ]),
            }
            args.extend([
                "-movflags".into(),
                "+frag_keyframe+empty_moov+default_base_moof".into(),
                "-f".into(),
                "mp4".into(),
            ]);
        }
        AudioFormat::Ogg => {
            args.extend([
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                OPUS_BITRATE.into(),
                "-ac".into(),
                OUTPUT_CHANNELS.into(),
                "-ar".into(),
                OUTPUT_SAMPLE_RATE.into(),
                "-f".into(),
                "ogg".into(),
            ]);
        }
    }

    args.push("pipe:1".into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavetap_core::request::{RequestPolicy, StreamQuery};

    fn request(fmt: &str) -> StreamRequest {
        let query = StreamQuery {
            url: Some("https://host/a.mp4".into()),
            fmt: Some(fmt.into()),
            ..Default::default()
        };
        let policy = RequestPolicy {
            max_duration_secs: 600,
            ..Default::default()
        };
        StreamRequest::build(&query, &policy).unwrap()
    }

    /// Value following `flag`, if present.
    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn m4a_encode_profile() {
        let args = build_args(&request("m4a"), AudioHandling::Encode, 5);
        assert_eq!(value_of(&args, "-i"), Some("https://host/a.mp4"));
        assert_eq!(value_of(&args, "-c:a"), Some("aac"));
        assert_eq!(value_of(&args, "-b:a"), Some(AAC_BITRATE));
        assert_eq!(value_of(&args, "-f"), Some("mp4"));
        assert!(value_of(&args, "-movflags").unwrap().contains("empty_moov"));
        assert_eq!(value_of(&args, "-t"), Some("600"));
        assert!(args.iter().any(|a| a == "-vn"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn m4a_copy_profile_skips_encoder_settings() {
        let args = build_args(&request("m4a"), AudioHandling::Copy, 5);
        assert_eq!(value_of(&args, "-c:a"), Some("copy"));
        assert!(value_of(&args, "-b:a").is_none());
        assert!(value_of(&args, "-ar").is_none());
    }

    #[test]
    fn ogg_profile_uses_opus() {
        let args = build_args(&request("ogg"), AudioHandling::Copy, 5);
        assert_eq!(value_of(&args, "-c:a"), Some("libopus"));
        assert_eq!(value_of(&args, "-b:a"), Some(OPUS_BITRATE));
        assert_eq!(value_of(&args, "-f"), Some("ogg"));
        assert!(value_of(&args, "-movflags").is_none());
    }

    #[test]
    fn reconnect_options_precede_input() {
        let args = build_args(&request("m4a"), AudioHandling::Encode, 7);
        let input = args.iter().position(|a| a == "-i").unwrap();
        let reconnect = args.iter().position(|a| a == "-reconnect").unwrap();
        assert!(reconnect < input);
        assert_eq!(value_of(&args, "-reconnect_delay_max"), Some("7"));

        let duration = args.iter().position(|a| a == "-t").unwrap();
        assert!(duration > input, "-t must apply to the output");
    }
}
