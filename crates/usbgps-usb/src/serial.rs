//! USB 串口芯片与线速率控制请求
//!
//! GPS 接收机的 USB 口通常是两类之一：
//!
//! - 标准 CDC-ACM（u-blox 等直接实现 USB 的芯片）：`SET_LINE_CODING` 带 7 字节线编码
//! - Silicon Labs CP210x 桥接芯片：厂商请求 `IFC_ENABLE` + `SET_BAUDRATE`

use std::fmt;

/// Silicon Labs 厂商 ID
pub const VENDOR_SILICON_LABS: u16 = 0x10C4;

// CDC-ACM class requests
pub const CDC_REQUEST_TYPE: u8 = 0x21; // Host-to-device | Class | Interface
pub const CDC_SET_LINE_CODING: u8 = 0x20;
pub const CDC_SET_CONTROL_LINE_STATE: u8 = 0x22;
/// DTR | RTS
pub const CDC_CONTROL_LINE_ACTIVE: u16 = 0x0003;

// CP210x vendor requests
pub const CP210X_REQUEST_TYPE: u8 = 0x41; // Host-to-device | Vendor | Interface
pub const CP210X_IFC_ENABLE: u8 = 0x00;
pub const CP210X_SET_LINE_CTL: u8 = 0x03;
pub const CP210X_SET_MHS: u8 = 0x07;
pub const CP210X_SET_BAUDRATE: u8 = 0x1E;
pub const CP210X_UART_ENABLE: u16 = 0x0001;
/// 8 数据位、无校验、1 停止位
pub const CP210X_LINE_8N1: u16 = 0x0800;
/// 置位 DTR/RTS（高字节为写掩码）
pub const CP210X_MHS_DTR_RTS: u16 = 0x0303;

/// 串口芯片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialChip {
    CdcAcm,
    Cp210x,
}

impl SerialChip {
    /// 根据厂商 ID 判断芯片类型
    pub fn detect(vendor_id: u16) -> Self {
        if vendor_id == VENDOR_SILICON_LABS {
            SerialChip::Cp210x
        } else {
            SerialChip::CdcAcm
        }
    }

    /// 打开设备后需要执行的初始化请求
    pub fn open_requests(self, interface: u16) -> Vec<ControlRequest> {
        match self {
            SerialChip::CdcAcm => vec![ControlRequest::new(
                CDC_REQUEST_TYPE,
                CDC_SET_CONTROL_LINE_STATE,
                CDC_CONTROL_LINE_ACTIVE,
                interface,
                Vec::new(),
            )],
            SerialChip::Cp210x => vec![
                ControlRequest::new(
                    CP210X_REQUEST_TYPE,
                    CP210X_IFC_ENABLE,
                    CP210X_UART_ENABLE,
                    interface,
                    Vec::new(),
                ),
                ControlRequest::new(
                    CP210X_REQUEST_TYPE,
                    CP210X_SET_LINE_CTL,
                    CP210X_LINE_8N1,
                    interface,
                    Vec::new(),
                ),
                ControlRequest::new(
                    CP210X_REQUEST_TYPE,
                    CP210X_SET_MHS,
                    CP210X_MHS_DTR_RTS,
                    interface,
                    Vec::new(),
                ),
            ],
        }
    }

    /// 设置线速率的控制请求（8N1）
    pub fn line_speed_request(self, interface: u16, baud: u32) -> ControlRequest {
        match self {
            SerialChip::CdcAcm => ControlRequest::new(
                CDC_REQUEST_TYPE,
                CDC_SET_LINE_CODING,
                0,
                interface,
                LineCoding::new_8n1(baud).to_bytes().to_vec(),
            ),
            SerialChip::Cp210x => ControlRequest::new(
                CP210X_REQUEST_TYPE,
                CP210X_SET_BAUDRATE,
                0,
                interface,
                baud.to_le_bytes().to_vec(),
            ),
        }
    }
}

impl fmt::Display for SerialChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialChip::CdcAcm => write!(f, "cdc-acm"),
            SerialChip::Cp210x => write!(f, "cp210x"),
        }
    }
}

/// 一次控制 OUT 传输
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

impl ControlRequest {
    pub fn new(request_type: u8, request: u8, value: u16, index: u16, data: Vec<u8>) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            data,
        }
    }

    /// 如果是线速率请求，返回其中的波特率
    pub fn line_speed(&self) -> Option<u32> {
        match (self.request_type, self.request) {
            (CDC_REQUEST_TYPE, CDC_SET_LINE_CODING) => {
                LineCoding::from_bytes(&self.data).map(|coding| coding.baud)
            },
            (CP210X_REQUEST_TYPE, CP210X_SET_BAUDRATE) => {
                let bytes: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
                Some(u32::from_le_bytes(bytes))
            },
            _ => None,
        }
    }
}

/// CDC 线编码结构（7 字节）
///
/// ```text
/// | dwDTERate (u32 LE) | bCharFormat | bParityType | bDataBits |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub baud: u32,
    /// 0 = 1 停止位, 1 = 1.5, 2 = 2
    pub stop_bits: u8,
    /// 0 = 无校验
    pub parity: u8,
    pub data_bits: u8,
}

impl LineCoding {
    pub const SIZE: usize = 7;

    pub fn new_8n1(baud: u32) -> Self {
        Self {
            baud,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let b = self.baud.to_le_bytes();
        [b[0], b[1], b[2], b[3], self.stop_bits, self.parity, self.data_bits]
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            baud: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            stop_bits: data[4],
            parity: data[5],
            data_bits: data[6],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_chip() {
        assert_eq!(SerialChip::detect(0x10C4), SerialChip::Cp210x);
        assert_eq!(SerialChip::detect(0x1546), SerialChip::CdcAcm);
        assert_eq!(SerialChip::detect(0x067B), SerialChip::CdcAcm);
    }

    #[test]
    fn test_cdc_line_coding_request() {
        let req = SerialChip::CdcAcm.line_speed_request(1, 9600);
        assert_eq!(req.request_type, 0x21);
        assert_eq!(req.request, 0x20);
        assert_eq!(req.index, 1);
        // 9600 = 0x2580
        assert_eq!(req.data, vec![0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(req.line_speed(), Some(9600));
    }

    #[test]
    fn test_cp210x_baud_request() {
        let req = SerialChip::Cp210x.line_speed_request(0, 115_200);
        assert_eq!(req.request_type, 0x41);
        assert_eq!(req.request, 0x1E);
        assert_eq!(req.data, 115_200u32.to_le_bytes().to_vec());
        assert_eq!(req.line_speed(), Some(115_200));
    }

    #[test]
    fn test_open_requests() {
        let cdc = SerialChip::CdcAcm.open_requests(0);
        assert_eq!(cdc.len(), 1);
        assert_eq!(cdc[0].request, CDC_SET_CONTROL_LINE_STATE);
        assert_eq!(cdc[0].line_speed(), None);

        let cp = SerialChip::Cp210x.open_requests(0);
        assert_eq!(cp[0].request, CP210X_IFC_ENABLE);
        assert_eq!(cp[0].value, CP210X_UART_ENABLE);
        assert!(cp.iter().all(|r| r.line_speed().is_none()));
    }

    #[test]
    fn test_line_coding_short_buffer() {
        assert_eq!(LineCoding::from_bytes(&[0x80, 0x25, 0, 0]), None);
        let req = ControlRequest::new(CP210X_REQUEST_TYPE, CP210X_SET_BAUDRATE, 0, 0, vec![1, 2]);
        assert_eq!(req.line_speed(), None);
    }
}
