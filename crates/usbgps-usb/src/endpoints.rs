//! 批量端点选择

/// 端点方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

/// 端点传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// 与后端无关的端点描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDesc {
    pub address: u8,
    pub direction: EndpointDirection,
    pub kind: TransferKind,
}

impl EndpointDesc {
    pub fn new(address: u8, direction: EndpointDirection, kind: TransferKind) -> Self {
        Self {
            address,
            direction,
            kind,
        }
    }

    /// 由端点地址推断方向（bit 7 = IN）
    pub fn bulk(address: u8) -> Self {
        let direction = if address & 0x80 != 0 {
            EndpointDirection::In
        } else {
            EndpointDirection::Out
        };
        Self::new(address, direction, TransferKind::Bulk)
    }
}

/// 选中的 IN/OUT 端点对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub endpoint_in: u8,
    pub endpoint_out: u8,
}

/// 查找 Bulk IN/OUT 端点
///
/// 按描述符顺序扫描，每个方向保留**最后一个**匹配的批量端点。
/// 有多个批量端点对的设备依赖这一选择顺序，不要改成取第一个。
pub fn select_bulk_endpoints(endpoints: &[EndpointDesc]) -> Option<BulkEndpoints> {
    let mut endpoint_in = None;
    let mut endpoint_out = None;

    for endpoint in endpoints {
        if endpoint.kind == TransferKind::Bulk {
            match endpoint.direction {
                EndpointDirection::In => endpoint_in = Some(endpoint.address),
                EndpointDirection::Out => endpoint_out = Some(endpoint.address),
            }
        }
    }

    match (endpoint_in, endpoint_out) {
        (Some(endpoint_in), Some(endpoint_out)) => Some(BulkEndpoints {
            endpoint_in,
            endpoint_out,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pair() {
        let eps = [EndpointDesc::bulk(0x81), EndpointDesc::bulk(0x01)];
        assert_eq!(
            select_bulk_endpoints(&eps),
            Some(BulkEndpoints {
                endpoint_in: 0x81,
                endpoint_out: 0x01
            })
        );
    }

    #[test]
    fn test_last_match_wins() {
        let eps = [
            EndpointDesc::bulk(0x81),
            EndpointDesc::bulk(0x01),
            EndpointDesc::bulk(0x82),
            EndpointDesc::bulk(0x02),
        ];
        let selected = select_bulk_endpoints(&eps).unwrap();
        assert_eq!(selected.endpoint_in, 0x82);
        assert_eq!(selected.endpoint_out, 0x02);
    }

    #[test]
    fn test_interrupt_endpoints_ignored() {
        let eps = [
            EndpointDesc::bulk(0x81),
            EndpointDesc::new(0x83, EndpointDirection::In, TransferKind::Interrupt),
            EndpointDesc::bulk(0x01),
        ];
        let selected = select_bulk_endpoints(&eps).unwrap();
        assert_eq!(selected.endpoint_in, 0x81);
    }

    #[test]
    fn test_missing_direction() {
        let eps = [
            EndpointDesc::bulk(0x81),
            EndpointDesc::new(0x83, EndpointDirection::In, TransferKind::Interrupt),
        ];
        assert_eq!(select_bulk_endpoints(&eps), None);
        assert_eq!(select_bulk_endpoints(&[]), None);
    }
}
