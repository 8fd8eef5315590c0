//! 定位结果
//!
//! NMEA 接收机把一次定位拆成多条语句输出：GGA 带海拔与卫星数，RMC 带日期、速度与航向。
//! [`FixAssembler`] 按 UTC 时刻把同一历元的语句合并成一个 [`Fix`]；
//! UBX 的 NAV-PVT 本身就是完整结果，直接转换。

use crate::Frame;
use crate::nmea::{GgaData, RmcData};
use crate::ubx::NavPvt;

/// 节 → 米/秒
const KNOTS_TO_MPS: f32 = 0.514_444;

/// 由 HDOP 估算水平精度时使用的用户等效测距误差（米）
const NMEA_UERE_M: f32 = 5.0;

/// 一次完整定位
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    /// 纬度（度，南纬为负）
    pub latitude: f64,
    /// 经度（度，西经为负）
    pub longitude: f64,
    /// 海拔（米）
    pub altitude: Option<f64>,
    /// 地速（米/秒）
    pub speed_mps: Option<f32>,
    /// 航向（度）
    pub bearing_deg: Option<f32>,
    /// UTC 时间戳（Unix 毫秒）
    pub timestamp_ms: u64,
    pub satellites: Option<u8>,
    /// 水平精度估计（米）
    pub accuracy_m: Option<f32>,
}

impl Fix {
    fn from_nav_pvt(pvt: &NavPvt) -> Option<Self> {
        if !pvt.has_fix() || !pvt.time_valid {
            return None;
        }
        let day_ms = (pvt.hour as u32 * 3600 + pvt.minute as u32 * 60 + pvt.second as u32) * 1000;
        let base = unix_millis((pvt.year, pvt.month, pvt.day), day_ms);
        let timestamp_ms = (base + (pvt.nano / 1_000_000) as i64).max(0) as u64;
        Some(Self {
            latitude: pvt.latitude,
            longitude: pvt.longitude,
            altitude: Some(pvt.altitude_msl),
            speed_mps: Some(pvt.ground_speed),
            bearing_deg: Some(pvt.heading),
            timestamp_ms,
            satellites: Some(pvt.satellites),
            accuracy_m: Some(pvt.horizontal_accuracy),
        })
    }
}

/// 同一 UTC 时刻的语句集合
#[derive(Debug, Default)]
struct Epoch {
    time_of_day_ms: u32,
    gga: Option<GgaData>,
    rmc: Option<RmcData>,
    emitted: bool,
}

/// 把逐帧输入的语句合并为定位结果
///
/// 同一历元的 GGA 与 RMC 都到齐时立即输出；只开启其中一种语句时，
/// 在下一个历元的第一条语句到达时输出上一个历元。
/// 在见到第一条带日期的 RMC 之前无法得到完整时间戳，不输出结果。
#[derive(Debug, Default)]
pub struct FixAssembler {
    epoch: Option<Epoch>,
    last_date: Option<(u16, u8, u8)>,
}

impl FixAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 丢弃未完成的历元（连接重建时调用），已知日期保留
    pub fn reset(&mut self) {
        self.epoch = None;
    }

    /// 输入一帧，可能得到一个定位结果
    pub fn push(&mut self, frame: &Frame) -> Option<Fix> {
        match frame {
            Frame::Ubx(ubx) => ubx.nav_pvt().ok().and_then(|pvt| Fix::from_nav_pvt(&pvt)),
            Frame::Nmea(sentence) => match sentence.sentence_type() {
                "GGA" => {
                    let gga = sentence.parse_gga().ok()?;
                    let time = gga.time_of_day_ms?;
                    self.merge(time, |epoch| epoch.gga = Some(gga))
                },
                "RMC" => {
                    let rmc = sentence.parse_rmc().ok()?;
                    if let Some(date) = rmc.date {
                        self.last_date = Some(date);
                    }
                    let time = rmc.time_of_day_ms?;
                    self.merge(time, |epoch| epoch.rmc = Some(rmc))
                },
                _ => None,
            },
            Frame::Sirf(_) => None,
        }
    }

    fn merge(&mut self, time_of_day_ms: u32, update: impl FnOnce(&mut Epoch)) -> Option<Fix> {
        let mut flushed = None;
        if self.epoch.as_ref().map(|e| e.time_of_day_ms) != Some(time_of_day_ms) {
            if let Some(previous) = self.epoch.take() {
                if !previous.emitted {
                    flushed = self.build(&previous);
                }
            }
            self.epoch = Some(Epoch {
                time_of_day_ms,
                ..Epoch::default()
            });
        }

        let epoch = self.epoch.as_mut()?;
        update(epoch);
        if flushed.is_some() {
            return flushed;
        }

        let complete = epoch.gga.is_some() && epoch.rmc.is_some() && !epoch.emitted;
        if !complete {
            return None;
        }
        let epoch = self.epoch.take()?;
        let fix = self.build(&epoch);
        self.epoch = Some(Epoch {
            emitted: true,
            ..epoch
        });
        fix
    }

    fn build(&self, epoch: &Epoch) -> Option<Fix> {
        let gga = epoch.gga.as_ref().filter(|g| g.has_fix());
        let rmc = epoch
            .rmc
            .as_ref()
            .filter(|r| r.valid && r.latitude.is_some() && r.longitude.is_some());

        let (latitude, longitude) = match (gga, rmc) {
            (Some(g), _) => (g.latitude?, g.longitude?),
            (None, Some(r)) => (r.latitude?, r.longitude?),
            (None, None) => return None,
        };
        let date = rmc.and_then(|r| r.date).or(self.last_date)?;
        let timestamp = unix_millis(date, epoch.time_of_day_ms);

        Some(Fix {
            latitude,
            longitude,
            altitude: gga.and_then(|g| g.altitude),
            speed_mps: rmc.and_then(|r| r.speed_knots).map(|k| k * KNOTS_TO_MPS),
            bearing_deg: rmc.and_then(|r| r.course_deg),
            timestamp_ms: timestamp.max(0) as u64,
            satellites: gga.and_then(|g| g.satellites),
            accuracy_m: gga.and_then(|g| g.hdop).map(|h| h * NMEA_UERE_M),
        })
    }
}

/// (年, 月, 日) + 当日毫秒 → Unix 毫秒
fn unix_millis((year, month, day): (u16, u8, u8), time_of_day_ms: u32) -> i64 {
    days_from_civil(year as i64, month as i64, day as i64) * 86_400_000 + time_of_day_ms as i64
}

/// 公历日期 → 距 1970-01-01 的天数
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameDecoder, ProtocolMode};

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const RMC: &str =
        "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    /// 1994-03-23 12:35:19 UTC
    const REFERENCE_MS: u64 = 764_426_119_000;

    fn frames(text: &str) -> Vec<Frame> {
        FrameDecoder::new(ProtocolMode::Nmea).feed(text.as_bytes())
    }

    fn nmea_line(body: &str) -> String {
        format!("${body}*{}\r\n", crate::nmea_checksum_hex(body.as_bytes()))
    }

    #[test]
    fn test_days_from_civil() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 3, 1), 11_017);
        assert_eq!(days_from_civil(1969, 12, 31), -1);
    }

    #[test]
    fn test_gga_then_rmc_merged() {
        let mut assembler = FixAssembler::new();
        let input = frames(&format!("{GGA}{RMC}"));
        assert_eq!(assembler.push(&input[0]), None);
        let fix = assembler.push(&input[1]).unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.516_666).abs() < 1e-4);
        assert_eq!(fix.altitude, Some(545.4));
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.timestamp_ms, REFERENCE_MS);
        assert!((fix.speed_mps.unwrap() - 22.4 * KNOTS_TO_MPS).abs() < 1e-4);
        assert_eq!(fix.bearing_deg, Some(84.4));
        assert!((fix.accuracy_m.unwrap() - 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_rmc_then_gga_emits_once() {
        let mut assembler = FixAssembler::new();
        let input = frames(&format!("{RMC}{GGA}"));
        assert_eq!(assembler.push(&input[0]), None);
        assert!(assembler.push(&input[1]).is_some());
        // 同一历元的重复语句不再输出
        assert_eq!(assembler.push(&input[1]), None);
    }

    #[test]
    fn test_rmc_only_stream_flushes_on_next_epoch() {
        let mut assembler = FixAssembler::new();
        let second =
            nmea_line("GPRMC,123520,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W");
        let input = frames(&format!("{RMC}{second}"));
        assert_eq!(assembler.push(&input[0]), None);
        let fix = assembler.push(&input[1]).unwrap();
        assert_eq!(fix.timestamp_ms, REFERENCE_MS);
        assert_eq!(fix.altitude, None);
    }

    #[test]
    fn test_gga_without_date_is_not_reported() {
        let mut assembler = FixAssembler::new();
        let second = nmea_line("GPGGA,123520,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let input = frames(&format!("{GGA}{second}"));
        assert_eq!(assembler.push(&input[0]), None);
        assert_eq!(assembler.push(&input[1]), None);
    }

    #[test]
    fn test_invalid_rmc_and_no_fix_gga_report_nothing() {
        let mut assembler = FixAssembler::new();
        let gga = nmea_line("GPGGA,123519,,,,,0,00,,,M,,M,,");
        let rmc = nmea_line("GPRMC,123519,V,,,,,,,230394,,");
        let input = frames(&format!("{gga}{rmc}"));
        assert_eq!(input.len(), 2);
        assert_eq!(assembler.push(&input[0]), None);
        assert_eq!(assembler.push(&input[1]), None);
    }
}
