//! Data for driving a rigid-body simulation: locked degrees of freedom,
//! collision exclusions and the chains of simulated bodies hanging from a
//! bone-driven root.

use crate::types::{Joint, Model, RigidMode};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// A limit whose lower and upper bound coincide allows no motion on its axis.
pub fn is_locked_dof(lower: f32, upper: f32) -> bool {
    (upper - lower).abs() < 1e-6
}

/// Locked rotation axes of a joint, X Y Z.
pub fn locked_rotation_axes(joint: &Joint) -> [bool; 3] {
    let limits = &joint.rotation_limits;
    [
        is_locked_dof(limits.lower.x, limits.upper.x),
        is_locked_dof(limits.lower.y, limits.upper.y),
        is_locked_dof(limits.lower.z, limits.upper.z),
    ]
}

/// Two rigid bodies that must not collide. `a < b`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NonCollisionPair {
    pub a: usize,
    pub b: usize,
    /// a joint already connects the pair
    pub joined: bool,
}

/// Every unordered pair where one body's mask excludes the other's group.
///
/// Pairs come out in discovery order: by the excluding body, then by group,
/// then by the excluded body.
pub fn non_collision_pairs(model: &Model) -> Vec<NonCollisionPair> {
    let rigids = &model.rigid_bodies;
    let mut groups: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (i, rigid) in rigids.iter().enumerate() {
        groups.entry(rigid.group).or_default().push(i);
    }
    let joined: HashSet<(usize, usize)> = joint_edges(model)
        .map(|(_, a, b)| ordered(a, b))
        .collect();

    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for (i, rigid) in rigids.iter().enumerate() {
        for group in 0..16 {
            if !rigid.excludes_group(group) {
                continue;
            }
            let members = match groups.get(&group) {
                Some(members) => members,
                None => continue,
            };
            for &j in members {
                if i == j {
                    continue;
                }
                let (a, b) = ordered(i, j);
                if !seen.insert((a, b)) {
                    continue;
                }
                pairs.push(NonCollisionPair {
                    a,
                    b,
                    joined: joined.contains(&(a, b)),
                });
            }
        }
    }
    log::debug!(
        "{} non-collision pairs, {} joined",
        pairs.len(),
        pairs.iter().filter(|p| p.joined).count()
    );
    pairs
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChainKind {
    Hair,
    Skirt,
    Accessory,
    Other,
}

const HAIR_NAMES: &[&str] = &[
    "髪", "hair", "前髪", "後髪", "横髪", "ポニテ", "ponytail", "twintail", "ツインテ",
];
const SKIRT_NAMES: &[&str] = &["スカート", "skirt", "裾"];
const ACCESSORY_NAMES: &[&str] = &["リボン", "ribbon", "ネクタイ", "tie", "アクセ", "acc"];

impl ChainKind {
    /// Classifies by the first matching name list, case-insensitively.
    pub fn classify<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let combined = names
            .into_iter()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let matches = |patterns: &[&str]| patterns.iter().any(|p| combined.contains(p));
        if matches(HAIR_NAMES) {
            ChainKind::Hair
        } else if matches(SKIRT_NAMES) {
            ChainKind::Skirt
        } else if matches(ACCESSORY_NAMES) {
            ChainKind::Accessory
        } else {
            ChainKind::Other
        }
    }
}

/// A bone-driven rigid body and the simulated bodies reachable from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsChain {
    /// name of the root body
    pub name: String,
    pub kind: ChainKind,
    pub root_rigid: usize,
    pub root_bone: Option<usize>,
    /// simulated bodies, root to tip in breadth-first order
    pub rigid_bodies: Vec<usize>,
    /// bones of `rigid_bodies`, bodies without a bone skipped
    pub bones: Vec<usize>,
    /// sorted
    pub joints: Vec<usize>,
}

/// Finds chains rooted at static bodies jointed to simulated ones.
///
/// Roots are visited in index order and a simulated body belongs to the first
/// chain that reaches it. The walk never passes through a static body.
pub fn detect_chains(model: &Model) -> Vec<PhysicsChain> {
    let rigids = &model.rigid_bodies;
    let mut neighbours: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for (joint, a, b) in joint_edges(model) {
        neighbours.entry(a).or_default().push((b, joint));
        neighbours.entry(b).or_default().push((a, joint));
    }
    let is_static = |i: usize| rigids[i].mode == RigidMode::Static;
    let links = |i: usize| neighbours.get(&i).map(Vec::as_slice).unwrap_or(&[]);

    let roots = (0..rigids.len())
        .filter(|&i| is_static(i) && links(i).iter().any(|&(n, _)| !is_static(n)));

    let mut visited = HashSet::new();
    let mut chains = Vec::new();
    for root in roots {
        let mut bodies = Vec::new();
        let mut joints = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for &(next, joint) in links(current) {
                if next == root || is_static(next) || !visited.insert(next) {
                    continue;
                }
                queue.push_back(next);
                bodies.push(next);
                joints.insert(joint);
            }
        }
        if bodies.is_empty() {
            continue;
        }
        let root_body = &rigids[root];
        let names = std::iter::once(root_body.name.as_str())
            .chain(bodies.iter().map(|&i| rigids[i].name.as_str()));
        chains.push(PhysicsChain {
            name: root_body.name.clone(),
            kind: ChainKind::classify(names),
            root_rigid: root,
            root_bone: root_body.bone,
            bones: bodies.iter().filter_map(|&i| rigids[i].bone).collect(),
            rigid_bodies: bodies,
            joints: joints.into_iter().collect(),
        });
    }
    log::debug!("{} physics chains", chains.len());
    chains
}

/// `(joint, rigid_a, rigid_b)` of every joint connecting two existing bodies.
fn joint_edges(model: &Model) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
    let len = model.rigid_bodies.len();
    model
        .joints
        .iter()
        .enumerate()
        .filter_map(move |(i, joint)| match (joint.rigid_a, joint.rigid_b) {
            (Some(a), Some(b)) if a < len && b < len => Some((i, a, b)),
            _ => None,
        })
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{AngleLimits, JointKind, Rigid, RigidShape};
    use glam::Vec3;

    fn rigid(name: &str, bone: Option<usize>, group: u8, mask: u16, mode: RigidMode) -> Rigid {
        Rigid {
            name: name.to_owned(),
            name_en: String::new(),
            bone,
            group,
            collision_mask: mask,
            shape: RigidShape::Sphere { radius: 1.0 },
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode,
        }
    }

    fn joint(a: usize, b: usize) -> Joint {
        Joint {
            name: format!("{}-{}", a, b),
            name_en: String::new(),
            kind: JointKind::Spring6Dof,
            rigid_a: Some(a),
            rigid_b: Some(b),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            translation_limits: AngleLimits {
                lower: Vec3::ZERO,
                upper: Vec3::ZERO,
            },
            rotation_limits: AngleLimits {
                lower: Vec3::new(-0.5, 0.0, -0.1),
                upper: Vec3::new(0.5, 0.0, 0.1),
            },
            spring_translation: Vec3::ZERO,
            spring_rotation: Vec3::ZERO,
        }
    }

    fn model(rigid_bodies: Vec<Rigid>, joints: Vec<Joint>) -> Model {
        Model {
            rigid_bodies,
            joints,
            ..Model::empty()
        }
    }

    #[test]
    fn locked_axes() {
        assert!(is_locked_dof(0.0, 0.0));
        assert!(is_locked_dof(0.3, 0.3 + 1e-7));
        assert!(!is_locked_dof(-0.1, 0.1));
        assert_eq!(locked_rotation_axes(&joint(0, 1)), [false, true, false]);
    }

    #[test]
    fn excluded_groups_make_pairs() {
        let all = 0xffff;
        let model = model(
            vec![
                // excludes group 1
                rigid("頭", Some(0), 0, all & !(1 << 1), RigidMode::Static),
                rigid("髪1", Some(1), 1, all, RigidMode::Dynamic),
                rigid("髪2", Some(2), 1, all & !(1 << 1), RigidMode::Dynamic),
                rigid("胸", Some(3), 2, all, RigidMode::Static),
            ],
            vec![joint(0, 1), joint(1, 2)],
        );
        let pairs = non_collision_pairs(&model);
        assert_eq!(
            pairs,
            vec![
                NonCollisionPair { a: 0, b: 1, joined: true },
                NonCollisionPair { a: 0, b: 2, joined: false },
                NonCollisionPair { a: 1, b: 2, joined: true },
            ]
        );
    }

    #[test]
    fn full_mask_has_no_pairs() {
        let model = model(
            vec![
                rigid("a", None, 0, 0xffff, RigidMode::Static),
                rigid("b", None, 0, 0xffff, RigidMode::Dynamic),
            ],
            vec![],
        );
        assert!(non_collision_pairs(&model).is_empty());
    }

    #[test]
    fn chain_from_static_root() {
        let model = model(
            vec![
                rigid("頭", Some(0), 0, 0xffff, RigidMode::Static),
                rigid("後髪1", Some(1), 1, 0xffff, RigidMode::Dynamic),
                rigid("後髪2", Some(2), 1, 0xffff, RigidMode::Dynamic),
                rigid("後髪3", None, 1, 0xffff, RigidMode::DynamicWithBonePosition),
                rigid("下半身", Some(4), 0, 0xffff, RigidMode::Static),
                rigid("スカート前", Some(5), 2, 0xffff, RigidMode::Dynamic),
            ],
            vec![joint(0, 1), joint(2, 1), joint(2, 3), joint(4, 5), joint(0, 4)],
        );
        let chains = detect_chains(&model);
        assert_eq!(chains.len(), 2);

        let hair = &chains[0];
        assert_eq!(hair.name, "頭");
        assert_eq!(hair.kind, ChainKind::Hair);
        assert_eq!(hair.root_rigid, 0);
        assert_eq!(hair.root_bone, Some(0));
        assert_eq!(hair.rigid_bodies, vec![1, 2, 3]);
        assert_eq!(hair.bones, vec![1, 2]);
        assert_eq!(hair.joints, vec![0, 1, 2]);

        let skirt = &chains[1];
        assert_eq!(skirt.kind, ChainKind::Skirt);
        assert_eq!(skirt.rigid_bodies, vec![5]);
        assert_eq!(skirt.joints, vec![3]);
    }

    #[test]
    fn shared_body_belongs_to_first_root() {
        let model = model(
            vec![
                rigid("Ribbon_L", None, 0, 0xffff, RigidMode::Static),
                rigid("body", None, 0, 0xffff, RigidMode::Dynamic),
                rigid("root2", None, 0, 0xffff, RigidMode::Static),
            ],
            vec![joint(0, 1), joint(2, 1)],
        );
        let chains = detect_chains(&model);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].rigid_bodies, vec![1]);
        assert_eq!(chains[0].kind, ChainKind::Accessory);
    }

    #[test]
    fn joints_to_missing_bodies_are_ignored() {
        let mut dangling = joint(0, 1);
        dangling.rigid_b = None;
        let model = model(
            vec![
                rigid("root", None, 0, 0xffff, RigidMode::Static),
                rigid("free", None, 0, 0xffff, RigidMode::Dynamic),
            ],
            vec![dangling, joint(0, 7)],
        );
        assert!(detect_chains(&model).is_empty());
    }

    #[test]
    fn classification_order() {
        assert_eq!(ChainKind::classify(["Hair_Ribbon"]), ChainKind::Hair);
        assert_eq!(ChainKind::classify(["SKIRT", "tie"]), ChainKind::Skirt);
        assert_eq!(ChainKind::classify(["胸", "乳"]), ChainKind::Other);
    }
}
