/// Digital output capability used for the write-protect and reset lines.
pub trait DigitalOutput {
    fn write(&mut self, pin: u8, level: bool);
}

/// Output that drives nothing, for boards without protect or reset lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPins;

impl DigitalOutput for NoPins {
    fn write(&mut self, _pin: u8, _level: bool) {}
}
