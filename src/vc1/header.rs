//! VC-1 sequence, entry-point, and picture headers.
//!
//! Covers the simple/main sequence layer and the advanced-profile sequence
//! and entry-point layers, plus progressive picture headers and the
//! three-bit field-pair type tags. See SMPTE 421M §6 for the sequence
//! layer and §7 for the picture layer.

use bitreader::BitReader;

use crate::pool::PictureType;
use crate::vc1::{BFRACTION_BI, BFRACTION_LUT, BFRACTION_VLC};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Simple,
    Main,
    Complex,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizerMode {
    Implicit,
    Explicit,
    NonUniform,
    Uniform,
}

/// Motion vector mode of a P picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvMode {
    OneMvHpelBilin,
    OneMv,
    OneMvHpel,
    MixedMv,
    IntensityComp,
}

/// Unary-coded MV mode, two orders depending on the quantizer.
const MV_PMODE_TABLE: [[MvMode; 5]; 2] = [
    [
        MvMode::OneMvHpelBilin,
        MvMode::OneMv,
        MvMode::OneMvHpel,
        MvMode::MixedMv,
        MvMode::IntensityComp,
    ],
    [
        MvMode::OneMv,
        MvMode::MixedMv,
        MvMode::OneMvHpel,
        MvMode::OneMvHpelBilin,
        MvMode::IntensityComp,
    ],
];

/// Implicit and explicit quantizer scales, indexed by `pqindex`.
const PQUANT_IMPLICIT: [u8; 32] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
    23, 24, 25, 27, 29, 31,
];

#[derive(Debug, Clone)]
pub struct SequenceHeader {
    pub profile: Profile,
    pub frmrtq_postproc: u8,
    pub bitrtq_postproc: u8,
    pub loop_filter: bool,
    pub res_x8: bool,
    pub multires: bool,
    pub fastuvmc: bool,
    pub extended_mv: bool,
    pub dquant: u8,
    pub vstransform: bool,
    pub overlap: bool,
    pub resync_marker: bool,
    pub rangered: bool,
    pub max_b_frames: u8,
    pub quantizer_mode: QuantizerMode,
    pub finterpflag: bool,
    pub res_sprite: bool,
    // advanced profile additions
    pub level: u8,
    pub interlace: bool,
    pub tfcntrflag: bool,
    pub psf: bool,
    pub width: usize,
    pub height: usize,
}

fn quantizer_mode(v: u8) -> QuantizerMode {
    match v {
        0 => QuantizerMode::Implicit,
        1 => QuantizerMode::Explicit,
        2 => QuantizerMode::NonUniform,
        _ => QuantizerMode::Uniform,
    }
}

fn decode012(r: &mut BitReader) -> Result<u8> {
    if !r.read_bool()? {
        Ok(0)
    } else {
        Ok(1 + r.read_u8(1)?)
    }
}

fn get_unary(r: &mut BitReader, stop: bool, max: u32) -> Result<u32> {
    let mut n = 0;
    while n < max && r.read_bool()? != stop {
        n += 1;
    }
    Ok(n)
}

impl SequenceHeader {
    pub fn parse(data: &[u8]) -> Result<SequenceHeader> {
        let mut r = BitReader::new(data);
        let profile = match r.read_u8(2)? {
            0 => Profile::Simple,
            1 => Profile::Main,
            2 => Profile::Complex,
            _ => Profile::Advanced,
        };
        if profile == Profile::Advanced {
            return Self::parse_advanced(&mut r);
        }

        let res_y411 = r.read_bool()?;
        let res_sprite = r.read_bool()?;
        if res_y411 {
            return Err(Error::Unsupported("old interlaced 4:1:1 mode"));
        }

        let frmrtq_postproc = r.read_u8(3)?;
        let bitrtq_postproc = r.read_u8(5)?;
        let loop_filter = r.read_bool()?;
        let res_x8 = r.read_bool()?;
        let multires = r.read_bool()?;
        let res_fasttx = r.read_bool()?;
        if !res_fasttx {
            warn!("reserved fasttx bit clear, using the fast transform anyway");
        }
        let fastuvmc = r.read_bool()?;
        if profile == Profile::Simple && !fastuvmc {
            return Err(Error::InvalidData("fastuvmc must be set in simple profile"));
        }
        let extended_mv = r.read_bool()?;
        if profile == Profile::Simple && extended_mv {
            return Err(Error::InvalidData("extended MVs are not allowed in simple profile"));
        }
        let dquant = r.read_u8(2)?;
        let vstransform = r.read_bool()?;
        let res_transtab = r.read_bool()?;
        if res_transtab {
            return Err(Error::InvalidData("reserved transtab bit set"));
        }
        let overlap = r.read_bool()?;
        let resync_marker = r.read_bool()?;
        let rangered = r.read_bool()?;
        let max_b_frames = r.read_u8(3)?;
        let qm = quantizer_mode(r.read_u8(2)?)
;
        let finterpflag = r.read_bool()?;

        if res_sprite {
            return Err(Error::Unsupported("sprite streams need the image flavor"));
        }

        Ok(SequenceHeader {
            profile,
            frmrtq_postproc,
            bitrtq_postproc,
            loop_filter,
            res_x8,
            multires,
            fastuvmc,
            extended_mv,
            dquant,
            vstransform,
            overlap,
            resync_marker,
            rangered,
            max_b_frames,
            quantizer_mode: qm,
            finterpflag,
            res_sprite,
            level: 0,
            interlace: false,
            tfcntrflag: false,
            psf: false,
            width: 0,
            height: 0,
        })
    }

    fn parse_advanced(r: &mut BitReader) -> Result<SequenceHeader> {
        let level = r.read_u8(3)?;
        if level >= 5 {
            warn!("reserved level {}", level);
        }
        let chromaformat = r.read_u8(2)?;
        if chromaformat != 1 {
            return Err(Error::Unsupported("only 4:2:0 chroma is defined"));
        }
        let frmrtq_postproc = r.read_u8(3)?;
        let bitrtq_postproc = r.read_u8(5)?;
        let _postprocflag = r.read_bool()?;
        let width = (r.read_u32(12)? as usize) * 2 + 2;
        let height = (r.read_u32(12)? as usize) * 2 + 2;
        let _broadcast = r.read_bool()?;
        let interlace = r.read_bool()?;
        let tfcntrflag = r.read_bool()?;
        let finterpflag = r.read_bool()?;
        r.skip(1)?; // reserved
        let psf = r.read_bool()?;
        if r.read_bool()? {
            // display extension: display size, aspect, framerate, color
            r.skip(14 + 14)?;
            if r.read_bool()? {
                let ar = r.read_u8(4)?;
                if ar == 15 {
                    r.skip(16)?;
                }
            }
            if r.read_bool()? {
                if r.read_bool()? {
                    r.skip(16)?;
                } else {
                    r.skip(12)?;
                }
            }
            if r.read_bool()? {
                r.skip(24)?;
            }
        }

        Ok(SequenceHeader {
            profile: Profile::Advanced,
            frmrtq_postproc,
            bitrtq_postproc,
            loop_filter: false,
            res_x8: false,
            multires: false,
            fastuvmc: false,
            extended_mv: false,
            dquant: 0,
            vstransform: false,
            overlap: false,
            resync_marker: false,
            rangered: false,
            max_b_frames: 7,
            quantizer_mode: QuantizerMode::Implicit,
            finterpflag,
            res_sprite: false,
            level,
            interlace,
            tfcntrflag,
            psf,
            width,
            height,
        })
    }
}

/// Advanced-profile entry point. `broken_link` and `closed_entry` affect
/// recovery semantics at the container level; they are surfaced as plain
/// fields and left to the caller.
#[derive(Debug, Clone)]
pub struct EntryPointHeader {
    pub broken_link: bool,
    pub closed_entry: bool,
    pub panscanflag: bool,
    pub refdist_flag: bool,
    pub loop_filter: bool,
    pub fastuvmc: bool,
    pub extended_mv: bool,
    pub dquant: u8,
    pub vstransform: bool,
    pub overlap: bool,
    pub quantizer_mode: QuantizerMode,
    pub coded_size: Option<(usize, usize)>,
    pub extended_dmv: bool,
    pub range_map_y: Option<u8>,
    pub range_map_uv: Option<u8>,
}

impl EntryPointHeader {
    pub fn parse(data: &[u8]) -> Result<EntryPointHeader> {
        let mut r = BitReader::new(data);
        let broken_link = r.read_bool()?;
        let closed_entry = r.read_bool()?;
        let panscanflag = r.read_bool()?;
        let refdist_flag = r.read_bool()?;
        let loop_filter = r.read_bool()?;
        let fastuvmc = r.read_bool()?;
        let extended_mv = r.read_bool()?;
        let dquant = r.read_u8(2)?;
        let vstransform = r.read_bool()?;
        let overlap = r.read_bool()?;
        let qm = quantizer_mode(r.read_u8(2)?);

        let coded_size = if r.read_bool()? {
            let w = (r.read_u32(12)? as usize) * 2 + 2;
            let h = (r.read_u32(12)? as usize) * 2 + 2;
            Some((w, h))
        } else {
            None
        };
        let extended_dmv = if extended_mv { r.read_bool()? } else { false };
        let range_map_y = if r.read_bool()? {
            Some(r.read_u8(3)?)
        } else {
            None
        };
        let range_map_uv = if r.read_bool()? {
            Some(r.read_u8(3)?)
        } else {
            None
        };

        Ok(EntryPointHeader {
            broken_link,
            closed_entry,
            panscanflag,
            refdist_flag,
            loop_filter,
            fastuvmc,
            extended_mv,
            dquant,
            vstransform,
            overlap,
            quantizer_mode: qm,
            coded_size,
            extended_dmv,
            range_map_y,
            range_map_uv,
        })
    }
}

/// One parsed progressive picture header (simple/main profiles).
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub pict_type: PictureType,
    /// decoded as a B picture without motion vectors
    pub bi_type: bool,
    pub interpfrm: bool,
    pub rangeredfrm: bool,
    /// scaled by [`super::B_FRACTION_DEN`]
    pub bfraction: i32,
    pub pqindex: u8,
    pub pq: u8,
    pub halfpq: bool,
    pub pquantizer: bool,
    pub respic: u8,
    pub mv_mode: MvMode,
    /// second MV mode plus the luma scale/shift when intensity
    /// compensation is active
    pub intensity_comp: Option<(MvMode, u8, u8)>,
}

/// Parse a progressive picture header. `rnd` carries the rounding-control
/// state across frames and is updated in place.
pub fn parse_frame_header(
    data: &[u8],
    seq: &SequenceHeader,
    rnd: &mut bool,
) -> Result<FrameHeader> {
    let mut r = BitReader::new(data);

    let interpfrm = if seq.finterpflag {
        r.read_bool()?
    } else {
        false
    };
    r.skip(2)?; // frame count, unused
    let rangeredfrm = if seq.rangered { r.read_bool()? } else { false };

    let mut pict_type = if r.read_bool()? {
        PictureType::P
    } else if seq.max_b_frames > 0 && !r.read_bool()? {
        PictureType::B
    } else {
        PictureType::I
    };

    let mut bi_type = false;
    let mut bfraction = 0i32;
    if pict_type == PictureType::B {
        let idx = BFRACTION_VLC.read(&mut r)?;
        if idx == 21 {
            return Err(Error::InvalidCode);
        }
        bfraction = i32::from(BFRACTION_LUT[idx as usize]);
        if idx == BFRACTION_BI {
            // a zero fraction turns the picture into intra-coded B
            pict_type = PictureType::Bi;
            bi_type = true;
        }
    }
    if pict_type == PictureType::I || pict_type == PictureType::Bi {
        r.skip(7)?; // buffer fullness
    }

    // rounding control alternates on P pictures and resets on intra ones
    if pict_type == PictureType::I || pict_type == PictureType::Bi {
        *rnd = true;
    } else if pict_type == PictureType::P {
        *rnd = !*rnd;
    }

    let pqindex = r.read_u8(5)?;
    if pqindex == 0 {
        return Err(Error::InvalidData("zero pqindex"));
    }
    let pq = if seq.quantizer_mode == QuantizerMode::Implicit {
        PQUANT_IMPLICIT[pqindex as usize]
    } else {
        pqindex
    };
    let halfpq = if pqindex < 9 { r.read_bool()? } else { false };
    let pquantizer = match seq.quantizer_mode {
        QuantizerMode::Implicit => pqindex < 9,
        QuantizerMode::NonUniform => false,
        QuantizerMode::Uniform => true,
        QuantizerMode::Explicit => r.read_bool()?,
    };
    let respic = if seq.multires && matches!(pict_type, PictureType::I | PictureType::P) {
        r.read_u8(2)?
    } else {
        0
    };

    let mut mv_mode = MvMode::OneMv;
    let mut intensity_comp = None;
    if pict_type == PictureType::P {
        if seq.extended_mv {
            let _mvrange = get_unary(&mut r, false, 3)?;
        }
        let lowquant = usize::from(pq <= 12);
        mv_mode = MV_PMODE_TABLE[lowquant][get_unary(&mut r, true, 4)? as usize];
        if mv_mode == MvMode::IntensityComp {
            let mv_mode2 = MV_PMODE_TABLE[lowquant][get_unary(&mut r, true, 3)? as usize];
            let lumscale = r.read_u8(6)?;
            let lumshift = r.read_u8(6)?;
            intensity_comp = Some((mv_mode2, lumscale, lumshift));
        }
    }

    Ok(FrameHeader {
        pict_type,
        bi_type,
        interpfrm,
        rangeredfrm,
        bfraction,
        pqindex,
        pq,
        halfpq,
        pquantizer,
        respic,
        mv_mode,
        intensity_comp,
    })
}

/// Picture types of a field pair from the three-bit field tag: bit 2
/// selects the B family, bits 1 and 0 pick the variant per field.
pub fn field_pair_types(fptype: u8) -> (PictureType, PictureType) {
    if fptype & 4 != 0 {
        (
            if fptype & 2 != 0 {
                PictureType::Bi
            } else {
                PictureType::B
            },
            if fptype & 1 != 0 {
                PictureType::Bi
            } else {
                PictureType::B
            },
        )
    } else {
        (
            if fptype & 2 != 0 {
                PictureType::P
            } else {
                PictureType::I
            },
            if fptype & 1 != 0 {
                PictureType::P
            } else {
                PictureType::I
            },
        )
    }
}

/// Frame coding mode of an advanced-profile picture: progressive,
/// frame-interlaced, or field-interlaced.
pub fn frame_coding_mode(r: &mut BitReader, interlace: bool) -> Result<u8> {
    if interlace {
        decode012(r)
    } else {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bits {
        bits: Vec<bool>,
    }

    impl Bits {
        fn new() -> Self {
            Bits { bits: Vec::new() }
        }
        fn put(&mut self, v: u32, n: u32) {
            for i in (0..n).rev() {
                self.bits.push((v >> i) & 1 != 0);
            }
        }
        fn finish(mut self) -> Vec<u8> {
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
            self.bits
                .chunks(8)
                .map(|c| c.iter().fold(0u8, |a, &b| (a << 1) | b as u8))
                .collect()
        }
    }

    fn main_profile_seq() -> SequenceHeader {
        let mut w = Bits::new();
        w.put(1, 2); // main profile
        w.put(0, 1); // res_y411
        w.put(0, 1); // res_sprite
        w.put(0, 3); // frmrtq
        w.put(0, 5); // bitrtq
        w.put(0, 1); // loop filter
        w.put(0, 1); // res_x8
        w.put(0, 1); // multires
        w.put(1, 1); // res_fasttx
        w.put(1, 1); // fastuvmc
        w.put(0, 1); // extended mv
        w.put(0, 2); // dquant
        w.put(0, 1); // vstransform
        w.put(0, 1); // res_transtab
        w.put(0, 1); // overlap
        w.put(0, 1); // resync
        w.put(0, 1); // rangered
        w.put(3, 3); // max b frames
        w.put(0, 2); // implicit quantizer
        w.put(0, 1); // finterp
        SequenceHeader::parse(&w.finish()).unwrap()
    }

    #[test]
    fn main_profile_sequence_parses() {
        let seq = main_profile_seq();
        assert_eq!(seq.profile, Profile::Main);
        assert!(seq.fastuvmc);
        assert_eq!(seq.max_b_frames, 3);
        assert_eq!(seq.quantizer_mode, QuantizerMode::Implicit);
    }

    #[test]
    fn simple_profile_requires_fastuvmc() {
        let mut w = Bits::new();
        w.put(0, 2); // simple profile
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 3);
        w.put(0, 5);
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 1);
        w.put(1, 1);
        w.put(0, 1); // fastuvmc off: invalid
        assert!(SequenceHeader::parse(&w.finish()).is_err());
    }

    #[test]
    fn b_picture_with_zero_fraction_becomes_bi() {
        let seq = main_profile_seq();
        let mut w = Bits::new();
        w.put(0, 2); // frame count
        w.put(0, 1); // not P
        w.put(0, 1); // B
        w.put(0b1111111, 7); // bfraction: BI escape
        w.put(0, 7); // buffer fullness
        w.put(5, 5); // pqindex
        w.put(0, 1); // halfpq
        let mut rnd = false;
        let hdr = parse_frame_header(&w.finish(), &seq, &mut rnd).unwrap();
        assert_eq!(hdr.pict_type, PictureType::Bi);
        assert!(hdr.bi_type);
        assert_eq!(hdr.bfraction, 0);
        assert!(rnd); // intra pictures reset rounding control
    }

    #[test]
    fn p_picture_with_intensity_compensation() {
        let seq = main_profile_seq();
        let mut w = Bits::new();
        w.put(0, 2); // frame count
        w.put(1, 1); // P
        w.put(20, 5); // pqindex (not low quant)
        // pq = 20 > 12 -> table 0; intensity comp is the unary code 0000
        w.put(0b0000, 4);
        // mv mode 2: '1' -> first entry
        w.put(1, 1);
        w.put(32, 6); // lumscale
        w.put(0, 6); // lumshift
        let mut rnd = false;
        let hdr = parse_frame_header(&w.finish(), &seq, &mut rnd).unwrap();
        assert_eq!(hdr.pict_type, PictureType::P);
        assert_eq!(hdr.mv_mode, MvMode::IntensityComp);
        let (mode2, scale, shift) = hdr.intensity_comp.unwrap();
        assert_eq!(mode2, MvMode::OneMvHpelBilin);
        assert_eq!((scale, shift), (32, 0));
        assert!(rnd); // first P toggles from false to true
    }

    #[test]
    fn entry_point_surfaces_recovery_flags() {
        let mut w = Bits::new();
        w.put(1, 1); // broken link
        w.put(0, 1); // closed entry
        w.put(0, 1); // panscan
        w.put(1, 1); // refdist
        w.put(0, 1); // loop filter
        w.put(1, 1); // fastuvmc
        w.put(0, 1); // extended mv
        w.put(0, 2); // dquant
        w.put(0, 1); // vstransform
        w.put(0, 1); // overlap
        w.put(1, 2); // explicit quantizer
        w.put(0, 1); // no coded size
        w.put(0, 1); // no luma range mapping
        w.put(0, 1); // no chroma range mapping
        let ep = EntryPointHeader::parse(&w.finish()).unwrap();
        assert!(ep.broken_link);
        assert!(!ep.closed_entry);
        assert!(ep.refdist_flag);
        assert_eq!(ep.quantizer_mode, QuantizerMode::Explicit);
        assert!(ep.coded_size.is_none());
        assert!(ep.range_map_y.is_none());
    }

    #[test]
    fn field_pair_tags() {
        assert_eq!(field_pair_types(0b000), (PictureType::I, PictureType::I));
        assert_eq!(field_pair_types(0b001), (PictureType::I, PictureType::P));
        assert_eq!(field_pair_types(0b010), (PictureType::P, PictureType::I));
        assert_eq!(field_pair_types(0b011), (PictureType::P, PictureType::P));
        assert_eq!(field_pair_types(0b100), (PictureType::B, PictureType::B));
        assert_eq!(field_pair_types(0b101), (PictureType::B, PictureType::Bi));
        assert_eq!(field_pair_types(0b111), (PictureType::Bi, PictureType::Bi));
    }
}
