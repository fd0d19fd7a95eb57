use anyhow::anyhow;
use esp_idf_svc::hal::{gpio::AnyOutputPin, peripheral::Peripheral, rmt::RmtChannel};
use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

use justdoit_common::{PixelDriver, StripError};

/// WS2812 strip on an RMT channel. The data pin comes from runtime
/// configuration, hence the untyped GPIO number.
pub struct NeopixelDriver {
    strip: Ws2812Esp32Rmt<'static>,
}

impl NeopixelDriver {
    pub fn new<C>(channel: C, data_pin: u32) -> anyhow::Result<Self>
    where
        C: Peripheral + 'static,
        C::P: RmtChannel,
    {
        let pin = unsafe { AnyOutputPin::new(data_pin as i32) };
        let strip = Ws2812Esp32Rmt::new(channel, pin)
            .map_err(|err| anyhow!("ws2812 init failed on GPIO{data_pin}: {err:?}"))?;
        Ok(Self { strip })
    }
}

impl PixelDriver for NeopixelDriver {
    fn render(&mut self, frame: &[RGB8]) -> Result<(), StripError> {
        self.strip
            .write(frame.iter().copied())
            .map_err(|err| StripError::Driver(format!("{err:?}")))
    }
}
