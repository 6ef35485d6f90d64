use crate::define_id_type;

define_id_type!(ModuleId, u32);
define_id_type!(BoardId, u32);
define_id_type!(ChipId, u32);
define_id_type!(ReticleId, u32);
define_id_type!(TriggerId, u32);
define_id_type!(AggregatorId, u32);
