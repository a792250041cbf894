//! Minimal GRIB2 writer for decoder tests.
//!
//! Produces one message per snapshot on a regular lat/lon grid with simple
//! packing (template 5.0, 16 bits per value, no bitmap).

/// Builds one GRIB2 message holding a single field.
#[derive(Debug, Clone)]
pub struct Grib2MessageBuilder {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    ni: u32,
    nj: u32,
    param_category: u8,
    param_number: u8,
    forecast_hour: u32,
    values: Vec<f32>,
}

impl Grib2MessageBuilder {
    /// A 2 m temperature field (category 0, number 0) on an `nj` x `ni` grid.
    pub fn new(nj: u32, ni: u32) -> Self {
        Self {
            year: 2018,
            month: 1,
            day: 1,
            hour: 0,
            ni,
            nj,
            param_category: 0,
            param_number: 0,
            forecast_hour: 0,
            values: vec![0.0; (ni * nj) as usize],
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    /// Row-major values; the length must be `ni * nj`.
    pub fn with_values(mut self, values: &[f32]) -> Self {
        assert_eq!(values.len(), (self.ni * self.nj) as usize, "value count");
        self.values = values.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.identification(),
            self.grid_definition(),
            self.product_definition(),
            self.data_representation(),
            self.bitmap(),
            self.data(),
        ];
        let total = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(0); // meteorological discipline
        message.push(2);
        message.extend_from_slice(&(total as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn identification(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(21);
        s.extend_from_slice(&21u32.to_be_bytes());
        s.push(1);
        s.extend_from_slice(&78u16.to_be_bytes()); // Offenbach
        s.extend_from_slice(&255u16.to_be_bytes());
        s.push(2);
        s.push(1);
        s.push(0); // analysis
        s.extend_from_slice(&self.year.to_be_bytes());
        s.extend_from_slice(&[self.month, self.day, self.hour, 0, 0]);
        s.push(1); // reanalysis products
        s.push(0); // analysis
        s
    }

    fn grid_definition(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(72);
        s.extend_from_slice(&72u32.to_be_bytes());
        s.push(3);
        s.push(0);
        s.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        s.push(0);
        s.push(0);
        s.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        s.push(6); // spherical earth
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());

        s.extend_from_slice(&self.ni.to_be_bytes());
        s.extend_from_slice(&self.nj.to_be_bytes());
        s.extend_from_slice(&0u32.to_be_bytes());
        s.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        let la1: i32 = 40_000_000;
        let lo1: i32 = 0;
        let step: u32 = 1_000_000;
        s.extend_from_slice(&la1.to_be_bytes());
        s.extend_from_slice(&lo1.to_be_bytes());
        s.push(48);
        s.extend_from_slice(&(la1 + (self.nj as i32 - 1) * step as i32).to_be_bytes());
        s.extend_from_slice(&(lo1 + (self.ni as i32 - 1) * step as i32).to_be_bytes());
        s.extend_from_slice(&step.to_be_bytes());
        s.extend_from_slice(&step.to_be_bytes());
        s.push(0b0100_0000); // +i, +j, i consecutive
        s
    }

    fn product_definition(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(34);
        s.extend_from_slice(&34u32.to_be_bytes());
        s.push(4);
        s.extend_from_slice(&0u16.to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes()); // template 4.0
        s.push(self.param_category);
        s.push(self.param_number);
        s.push(0); // analysis
        s.push(0);
        s.push(0);
        s.extend_from_slice(&0u16.to_be_bytes());
        s.push(0);
        s.push(1); // hours
        s.extend_from_slice(&self.forecast_hour.to_be_bytes());
        s.push(103); // height above ground
        s.push(0);
        s.extend_from_slice(&2u32.to_be_bytes());
        s.push(255);
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s
    }

    fn data_representation(&self) -> Vec<u8> {
        let (reference, scale, bits) = self.packing();
        let mut s = Vec::with_capacity(21);
        s.extend_from_slice(&21u32.to_be_bytes());
        s.push(5);
        s.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes()); // template 5.0
        s.extend_from_slice(&reference.to_be_bytes());
        s.extend_from_slice(&sign_magnitude(scale).to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes());
        s.push(bits);
        s.push(0);
        s
    }

    fn bitmap(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(6);
        s.extend_from_slice(&6u32.to_be_bytes());
        s.push(6);
        s.push(255);
        s
    }

    fn data(&self) -> Vec<u8> {
        let (reference, scale, bits) = self.packing();
        let mut packed = Vec::new();
        if bits > 0 {
            let step = 2f32.powi(scale as i32);
            for value in &self.values {
                packed.extend_from_slice(&(((value - reference) / step).round() as u16).to_be_bytes());
            }
        }

        let mut s = Vec::with_capacity(5 + packed.len());
        s.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        s.push(7);
        s.extend_from_slice(&packed);
        s
    }

    /// Reference value, binary scale factor and bit width.
    fn packing(&self) -> (f32, i16, u8) {
        let (min, max) = self
            .values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        if range == 0.0 {
            return (min, 0, 0);
        }
        let scale = (range / 65535.0).log2().ceil() as i16;
        (min, scale, 16)
    }
}

/// GRIB2 stores signed integers as sign bit plus magnitude.
fn sign_magnitude(value: i16) -> u16 {
    if value < 0 {
        0x8000 | value.unsigned_abs()
    } else {
        value as u16
    }
}

/// Concatenate messages into one archive.
pub fn encode_grib(messages: &[Grib2MessageBuilder]) -> Vec<u8> {
    messages.iter().flat_map(|m| m.build()).collect()
}

/// One message per snapshot, hourly forecast offsets, all the same parameter.
pub fn grib_snapshots(nj: u32, ni: u32, snapshots: &[Vec<f32>]) -> Vec<Grib2MessageBuilder> {
    snapshots
        .iter()
        .enumerate()
        .map(|(hour, values)| {
            Grib2MessageBuilder::new(nj, ni)
                .with_forecast_hour(hour as u32)
                .with_values(values)
        })
        .collect()
}
