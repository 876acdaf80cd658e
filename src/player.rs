use crate::error::OutputError;
use crate::mixer::PlayableStream;
use rodio::{OutputStream, OutputStreamHandle, Sink};

/// Speaker output wrapping rodio. Not Send: lives on the audio thread.
pub struct Player {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl Player {
    /// Open the default audio output and create a playback sink.
    pub fn new() -> Result<Self, OutputError> {
        let (stream, handle) = OutputStream::try_default()?;
        let sink = Sink::try_new(&handle)?;
        Ok(Player {
            _stream: stream,
            _stream_handle: handle,
            sink,
        })
    }

    /// Replace whatever is playing with a rendered block.
    pub fn play(&self, stream: PlayableStream) {
        self.sink.stop();
        self.sink.append(stream);
        self.sink.play();
    }

    /// Stop playback and clear the sink.
    pub fn stop(&self) {
        self.sink.stop();
    }

    pub fn pause(&self) {
        self.sink.pause();
    }

    pub fn resume(&self) {
        self.sink.play();
    }

    /// True when the sink has finished all queued audio.
    pub fn is_empty(&self) -> bool {
        self.sink.empty()
    }

    pub fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }
}
