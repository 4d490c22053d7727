//! Japanese to English names for the standard MMD skeleton and facial morphs.
//!
//! Left/right bones use the `.L` / `.R` suffix convention of the target application.

use std::collections::HashMap;

const BONE_NAMES: &[(&str, &str)] = &[
    // core body
    ("全ての親", "ParentNode"),
    ("センター", "Center"),
    ("グルーブ", "Groove"),
    ("腰", "Waist"),
    ("上半身", "UpperBody"),
    ("上半身2", "UpperBody2"),
    ("上半身3", "UpperBody3"),
    ("下半身", "LowerBody"),
    ("首", "Neck"),
    ("頭", "Head"),
    // eyes
    ("両目", "Eyes"),
    ("左目", "Eye.L"),
    ("右目", "Eye.R"),
    // arms
    ("左肩", "Shoulder.L"),
    ("左腕", "Arm.L"),
    ("左腕捩", "ArmTwist.L"),
    ("左ひじ", "Elbow.L"),
    ("左手捩", "HandTwist.L"),
    ("左手首", "Wrist.L"),
    ("右肩", "Shoulder.R"),
    ("右腕", "Arm.R"),
    ("右腕捩", "ArmTwist.R"),
    ("右ひじ", "Elbow.R"),
    ("右手捩", "HandTwist.R"),
    ("右手首", "Wrist.R"),
    // fingers
    ("左親指０", "Thumb0.L"),
    ("左親指１", "Thumb1.L"),
    ("左親指２", "Thumb2.L"),
    ("左人指１", "IndexFinger1.L"),
    ("左人指２", "IndexFinger2.L"),
    ("左人指３", "IndexFinger3.L"),
    ("左中指１", "MiddleFinger1.L"),
    ("左中指２", "MiddleFinger2.L"),
    ("左中指３", "MiddleFinger3.L"),
    ("左薬指１", "RingFinger1.L"),
    ("左薬指２", "RingFinger2.L"),
    ("左薬指３", "RingFinger3.L"),
    ("左小指１", "LittleFinger1.L"),
    ("左小指２", "LittleFinger2.L"),
    ("左小指３", "LittleFinger3.L"),
    ("右親指０", "Thumb0.R"),
    ("右親指１", "Thumb1.R"),
    ("右親指２", "Thumb2.R"),
    ("右人指１", "IndexFinger1.R"),
    ("右人指２", "IndexFinger2.R"),
    ("右人指３", "IndexFinger3.R"),
    ("右中指１", "MiddleFinger1.R"),
    ("右中指２", "MiddleFinger2.R"),
    ("右中指３", "MiddleFinger3.R"),
    ("右薬指１", "RingFinger1.R"),
    ("右薬指２", "RingFinger2.R"),
    ("右薬指３", "RingFinger3.R"),
    ("右小指１", "LittleFinger1.R"),
    ("右小指２", "LittleFinger2.R"),
    ("右小指３", "LittleFinger3.R"),
    // legs
    ("左足", "Leg.L"),
    ("左ひざ", "Knee.L"),
    ("左足首", "Ankle.L"),
    ("左つま先", "Toe.L"),
    ("右足", "Leg.R"),
    ("右ひざ", "Knee.R"),
    ("右足首", "Ankle.R"),
    ("右つま先", "Toe.R"),
    // ik
    ("左足ＩＫ", "LegIK.L"),
    ("右足ＩＫ", "LegIK.R"),
    ("左つま先ＩＫ", "ToeIK.L"),
    ("右つま先ＩＫ", "ToeIK.R"),
    // common variants
    ("左足D", "Leg_D.L"),
    ("右足D", "Leg_D.R"),
    ("左ひざD", "Knee_D.L"),
    ("右ひざD", "Knee_D.R"),
    ("左足首D", "Ankle_D.L"),
    ("右足首D", "Ankle_D.R"),
    ("左足先EX", "ToeTipEX.L"),
    ("右足先EX", "ToeTipEX.R"),
    ("左肩P", "ShoulderP.L"),
    ("右肩P", "ShoulderP.R"),
    ("左肩C", "ShoulderC.L"),
    ("右肩C", "ShoulderC.R"),
];

const MORPH_NAMES: &[(&str, &str)] = &[
    // mouth
    ("あ", "A"),
    ("い", "I"),
    ("う", "U"),
    ("え", "E"),
    ("お", "O"),
    ("ん", "N"),
    ("ワ", "Wa"),
    ("▲", "Triangle"),
    ("∧", "Hmm"),
    ("ω", "Omega"),
    ("ぺろっ", "TongueOut"),
    ("てへぺろ", "Tehepero"),
    ("口角上げ", "MouthCornerUp"),
    ("口角下げ", "MouthCornerDown"),
    ("口横広げ", "MouthWiden"),
    // eyes
    ("まばたき", "Blink"),
    ("笑い", "Smile"),
    ("ウィンク", "Wink.L"),
    ("ウィンク右", "Wink.R"),
    ("ウィンク２", "Wink2.L"),
    ("ｳｨﾝｸ２右", "Wink2.R"),
    ("はぅ", "Hau"),
    ("なごみ", "Calm"),
    ("びっくり", "Surprised"),
    ("じと目", "Stare"),
    ("瞳小", "PupilSmall"),
    ("白目", "WhiteEyes"),
    ("ハイライト消", "HighlightOff"),
    // eyebrows
    ("真面目", "Serious"),
    ("困る", "Troubled"),
    ("にこり", "Cheerful"),
    ("怒り", "Angry"),
    ("上", "BrowUp"),
    ("下", "BrowDown"),
    ("前", "BrowForward"),
    // effects
    ("照れ", "Blush"),
    ("涙", "Tears"),
    ("青ざめ", "Pale"),
];

/// English name of a standard bone, `None` for anything not in the table.
pub fn translate(name_jp: &str) -> Option<&'static str> {
    lookup(BONE_NAMES, name_jp)
}

pub fn translate_morph(name_jp: &str) -> Option<&'static str> {
    lookup(MORPH_NAMES, name_jp)
}

fn lookup(table: &[(&str, &'static str)], name_jp: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(jp, _)| *jp == name_jp)
        .map(|(_, en)| *en)
}

/// `Arm_L` -> `Arm.L`; only a trailing `_L` / `_R` is rewritten.
pub fn normalize_lr(name: &str) -> String {
    match name.strip_suffix("_L").or_else(|| name.strip_suffix("_R")) {
        Some(stem) => format!("{}.{}", stem, &name[name.len() - 1..]),
        None => name.to_owned(),
    }
}

/// Target-language name of every bone, in order, unique within the model.
///
/// Each bone takes its translation, else its trimmed English name, else its
/// Japanese name. Repeats get `.001`, `.002`, ... appended.
pub fn resolve_bone_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    uniquify(names.into_iter().map(|(jp, en)| match translate(jp) {
        Some(translated) => translated.to_owned(),
        None if !en.trim().is_empty() => normalize_lr(en.trim()),
        None => jp.to_owned(),
    }))
}

/// Same resolution as [`resolve_bone_names`] with the morph table.
pub fn resolve_morph_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    uniquify(names.into_iter().map(|(jp, en)| match translate_morph(jp) {
        Some(translated) => translated.to_owned(),
        None if !en.trim().is_empty() => normalize_lr(en.trim()),
        None => jp.to_owned(),
    }))
}

fn uniquify(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .map(|base| match seen.get_mut(&base) {
            Some(count) => {
                *count += 1;
                format!("{}.{:03}", base, count)
            }
            None => {
                seen.insert(base.clone(), 0);
                base
            }
        })
        .collect()
}
