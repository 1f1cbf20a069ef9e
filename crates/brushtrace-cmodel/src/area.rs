// area.rs - area portals: connectivity flood and portal/area bit vectors

use std::io::{Read, Write};

use brushtrace_common::common::{com_error, ERR_FATAL};
use brushtrace_common::qfiles::{DArea, DAreaPortal};
use log::{debug, warn};

use crate::error::{check_index, CmError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CArea {
    pub numareaportals: usize,
    pub firstareaportal: usize,
    pub floodnum: i32,
    pub floodvalid: i32,
}

/// Area graph plus the open/closed state of every portal.
///
/// Area 0 is never flooded; flood groups are numbered from 1.
#[derive(Debug, Clone)]
pub struct AreaPortals {
    areas: Vec<CArea>,
    portals: Vec<DAreaPortal>,
    portal_open: Vec<bool>,
    floodvalid: i32,
    no_areas: bool,
}

impl Default for AreaPortals {
    /// A single unconnected area, as for a world without a map.
    fn default() -> Self {
        Self {
            areas: vec![CArea::default()],
            portals: Vec::new(),
            portal_open: Vec::new(),
            floodvalid: 0,
            no_areas: false,
        }
    }
}

impl AreaPortals {
    /// Builds the graph from the map's area and portal records. All portals
    /// start closed and the areas are flooded once.
    pub fn new(areas: &[DArea], portals: &[DAreaPortal], no_areas: bool) -> Result<Self> {
        let mut out = Vec::with_capacity(areas.len().max(1));
        for area in areas {
            let first = check_index("area firstareaportal", area.firstareaportal as i64, portals.len() + 1)?;
            if area.numareaportals < 0 || first + area.numareaportals as usize > portals.len() {
                return Err(CmError::BadIndex {
                    what: "area portal range",
                    index: area.firstareaportal as i64 + area.numareaportals as i64,
                    limit: portals.len(),
                });
            }
            out.push(CArea {
                numareaportals: area.numareaportals as usize,
                firstareaportal: first,
                floodnum: 0,
                floodvalid: 0,
            });
        }
        if out.is_empty() {
            out.push(CArea::default());
        }
        for portal in portals {
            check_index("areaportal portalnum", portal.portalnum as i64, portals.len())?;
            check_index("areaportal otherarea", portal.otherarea as i64, out.len())?;
        }

        let mut ap = Self {
            areas: out,
            portals: portals.to_vec(),
            portal_open: vec![false; portals.len()],
            floodvalid: 0,
            no_areas,
        };
        ap.flood_area_connections();
        Ok(ap)
    }

    pub fn num_areas(&self) -> usize {
        self.areas.len()
    }

    pub fn num_portals(&self) -> usize {
        self.portal_open.len()
    }

    pub fn area(&self, idx: usize) -> Option<&CArea> {
        self.areas.get(idx)
    }

    pub fn no_areas(&self) -> bool {
        self.no_areas
    }

    pub fn set_no_areas(&mut self, no_areas: bool) {
        self.no_areas = no_areas;
    }

    pub fn portal_open(&self, portalnum: usize) -> bool {
        self.portal_open.get(portalnum).copied().unwrap_or(false)
    }

    // ============================================================
    // Flooding
    // ============================================================

    fn flood_area_r(&mut self, area_idx: usize, floodnum: i32) {
        let area = &mut self.areas[area_idx];
        if area.floodvalid == self.floodvalid {
            if area.floodnum == floodnum {
                return;
            }
            com_error(ERR_FATAL, &format!("FloodArea_r: reflooded area {}", area_idx));
            return;
        }

        area.floodnum = floodnum;
        area.floodvalid = self.floodvalid;
        let (first, count) = (area.firstareaportal, area.numareaportals);

        for i in first..first + count {
            let portal = self.portals[i];
            if self.portal_open[portal.portalnum as usize] {
                self.flood_area_r(portal.otherarea as usize, floodnum);
            }
        }
    }

    /// Recomputes every area's flood group from the current portal states.
    pub fn flood_area_connections(&mut self) {
        // all current floods are now invalid
        self.floodvalid = self.floodvalid.wrapping_add(1);
        let mut floodnum = 0;

        // area 0 is not used
        for i in 1..self.areas.len() {
            if self.areas[i].floodvalid == self.floodvalid {
                continue; // already flooded into
            }
            floodnum += 1;
            self.flood_area_r(i, floodnum);
        }
        debug!("flood_area_connections: {} groups over {} areas", floodnum, self.areas.len());
    }

    /// Opens or closes one portal and refloods. Bad portal numbers are ignored.
    pub fn set_area_portal_state(&mut self, portalnum: usize, open: bool) {
        match self.portal_open.get_mut(portalnum) {
            Some(state) => *state = open,
            None => {
                warn!(
                    "set_area_portal_state: areaportal {} >= numareaportals {}",
                    portalnum,
                    self.portal_open.len()
                );
                return;
            }
        }
        self.flood_area_connections();
    }

    pub fn areas_connected(&self, area1: usize, area2: usize) -> bool {
        if self.no_areas {
            return true;
        }
        match (self.areas.get(area1), self.areas.get(area2)) {
            (Some(a), Some(b)) => a.floodnum == b.floodnum,
            _ => {
                warn!("areas_connected: area > numareas ({} / {})", area1.max(area2), self.areas.len());
                false
            }
        }
    }

    // ============================================================
    // Bit vectors
    // ============================================================

    /// Writes a bit vector of all the areas in the same flood as `area`;
    /// area 0 sees everything. Returns the number of bytes written.
    pub fn write_area_bits(&self, buffer: &mut [u8], area: usize) -> usize {
        let bytes = (self.areas.len() + 7) >> 3;
        if buffer.len() < bytes {
            warn!("write_area_bits: buffer of {} bytes, need {}", buffer.len(), bytes);
        }
        let bytes = bytes.min(buffer.len());
        let out = &mut buffer[..bytes];

        if self.no_areas {
            // for debugging, send everything
            out.fill(0xff);
            return bytes;
        }

        out.fill(0);
        let floodnum = self.areas.get(area).map_or(0, |a| a.floodnum);
        for (i, a) in self.areas.iter().enumerate() {
            if (a.floodnum == floodnum || area == 0) && (i >> 3) < bytes {
                out[i >> 3] |= 1 << (i & 7);
            }
        }
        bytes
    }

    /// Packs the portal states, one bit per portal in ascending order.
    pub fn write_portal_bits(&self, buffer: &mut [u8]) -> usize {
        let bytes = (self.portal_open.len() + 7) >> 3;
        if buffer.len() < bytes {
            warn!("write_portal_bits: buffer of {} bytes, need {}", buffer.len(), bytes);
        }
        let bytes = bytes.min(buffer.len());
        buffer[..bytes].fill(0);
        for (i, &open) in self.portal_open.iter().enumerate() {
            if open && (i >> 3) < bytes {
                buffer[i >> 3] |= 1 << (i & 7);
            }
        }
        bytes
    }

    /// Applies packed portal states from the first `len` bytes of `buffer`.
    /// Portals past the supplied bytes are opened. Refloods.
    pub fn set_portal_states(&mut self, buffer: &[u8], len: usize) {
        let len = len.min(buffer.len());
        for (i, open) in self.portal_open.iter_mut().enumerate() {
            let byte = i >> 3;
            *open = if byte < len {
                buffer[byte] & (1 << (i & 7)) != 0
            } else {
                true
            };
        }
        self.flood_area_connections();
    }

    /// Save-game form: portal count (i32 LE) then the packed bits.
    pub fn write_portal_state<W: Write>(&self, mut writer: W) -> Result<()> {
        let mut bits = vec![0u8; (self.portal_open.len() + 7) >> 3];
        self.write_portal_bits(&mut bits);
        writer.write_all(&(self.portal_open.len() as i32).to_le_bytes())?;
        writer.write_all(&bits)?;
        Ok(())
    }

    pub fn read_portal_state<R: Read>(&mut self, mut reader: R) -> Result<()> {
        let mut count = [0u8; 4];
        reader.read_exact(&mut count)?;
        let count = i32::from_le_bytes(count).max(0) as usize;
        let mut bits = vec![0u8; (count + 7) >> 3];
        reader.read_exact(&mut bits)?;
        if count != self.portal_open.len() {
            warn!(
                "read_portal_state: saved {} portals, map has {}",
                count,
                self.portal_open.len()
            );
        }
        let len = bits.len();
        self.set_portal_states(&bits, len);
        Ok(())
    }

    /// Forgets every portal state (all closed) and refloods, as on a map restart.
    pub fn reset(&mut self) {
        self.portal_open.fill(false);
        self.flood_area_connections();
    }
}
