//! Фиксированная таблица лимитов ресурсов.
//!
//! Значения не настраиваются пользователем: валидатор выбирает
//! подмножество по стадии через [`ResourceLimits::for_stage`].

use crate::stage::Stage;

/// Флаги ограничений языка (все разрешены).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageLimits {
    pub non_inductive_for_loops: bool,
    pub while_loops: bool,
    pub do_while_loops: bool,
    pub general_uniform_indexing: bool,
    pub general_attribute_matrix_vector_indexing: bool,
    pub general_varying_indexing: bool,
    pub general_sampler_indexing: bool,
    pub general_variable_indexing: bool,
    pub general_constant_matrix_vector_indexing: bool,
}

/// Таблица лимитов ресурсов.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_lights: u32,
    pub max_clip_planes: u32,
    pub max_texture_units: u32,
    pub max_texture_coords: u32,
    pub max_vertex_attribs: u32,
    pub max_vertex_uniform_components: u32,
    pub max_varying_floats: u32,
    pub max_vertex_texture_image_units: u32,
    pub max_combined_texture_image_units: u32,
    pub max_texture_image_units: u32,
    pub max_fragment_uniform_components: u32,
    pub max_draw_buffers: u32,
    pub max_vertex_uniform_vectors: u32,
    pub max_varying_vectors: u32,
    pub max_fragment_uniform_vectors: u32,
    pub max_vertex_output_vectors: u32,
    pub max_fragment_input_vectors: u32,
    pub min_program_texel_offset: i32,
    pub max_program_texel_offset: i32,
    pub max_clip_distances: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_uniform_components: u32,
    pub max_compute_texture_image_units: u32,
    pub max_compute_image_uniforms: u32,
    pub max_compute_atomic_counters: u32,
    pub max_compute_atomic_counter_buffers: u32,
    pub max_varying_components: u32,
    pub max_vertex_output_components: u32,
    pub max_fragment_input_components: u32,
    pub max_image_units: u32,
    pub max_combined_image_units_and_fragment_outputs: u32,
    pub max_combined_shader_output_resources: u32,
    pub max_cull_distances: u32,
    pub max_combined_clip_and_cull_distances: u32,
    pub max_samples: u32,
    pub limits: LanguageLimits,
}

pub const DEFAULT_RESOURCE_LIMITS: ResourceLimits = ResourceLimits {
    max_lights: 32,
    max_clip_planes: 6,
    max_texture_units: 32,
    max_texture_coords: 32,
    max_vertex_attribs: 64,
    max_vertex_uniform_components: 4096,
    max_varying_floats: 64,
    max_vertex_texture_image_units: 32,
    max_combined_texture_image_units: 80,
    max_texture_image_units: 32,
    max_fragment_uniform_components: 4096,
    max_draw_buffers: 32,
    max_vertex_uniform_vectors: 128,
    max_varying_vectors: 8,
    max_fragment_uniform_vectors: 16,
    max_vertex_output_vectors: 16,
    max_fragment_input_vectors: 15,
    min_program_texel_offset: -8,
    max_program_texel_offset: 7,
    max_clip_distances: 8,
    max_compute_work_group_count: [65535, 65535, 65535],
    max_compute_work_group_size: [1024, 1024, 64],
    max_compute_uniform_components: 1024,
    max_compute_texture_image_units: 16,
    max_compute_image_uniforms: 8,
    max_compute_atomic_counters: 8,
    max_compute_atomic_counter_buffers: 1,
    max_varying_components: 60,
    max_vertex_output_components: 64,
    max_fragment_input_components: 128,
    max_image_units: 8,
    max_combined_image_units_and_fragment_outputs: 8,
    max_combined_shader_output_resources: 8,
    max_cull_distances: 8,
    max_combined_clip_and_cull_distances: 8,
    max_samples: 4,
    limits: LanguageLimits {
        non_inductive_for_loops: true,
        while_loops: true,
        do_while_loops: true,
        general_uniform_indexing: true,
        general_attribute_matrix_vector_indexing: true,
        general_varying_indexing: true,
        general_sampler_indexing: true,
        general_variable_indexing: true,
        general_constant_matrix_vector_indexing: true,
    },
};

/// Лимиты, которые валидатор проверяет для одной стадии.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    /// Скалярные компоненты всех не-сэмплерных uniform.
    pub max_uniform_components: u32,
    /// Число сэмплеров (с учётом массивов).
    pub max_texture_image_units: u32,
    /// Слоты входных переменных (0: не проверяется).
    pub max_input_locations: u32,
    /// Слоты выходных переменных (0: не проверяется).
    pub max_output_locations: u32,
    /// Максимальный размер рабочей группы (только compute).
    pub max_work_group_size: Option<[u32; 3]>,
}

impl ResourceLimits {
    pub fn for_stage(&self, stage: Stage) -> StageLimits {
        match stage {
            Stage::Vertex => StageLimits {
                max_uniform_components: self.max_vertex_uniform_components,
                max_texture_image_units: self.max_vertex_texture_image_units,
                max_input_locations: self.max_vertex_attribs,
                max_output_locations: self.max_vertex_output_components / 4,
                max_work_group_size: None,
            },
            Stage::Fragment => StageLimits {
                max_uniform_components: self.max_fragment_uniform_components,
                max_texture_image_units: self.max_texture_image_units,
                max_input_locations: self.max_fragment_input_components / 4,
                max_output_locations: self.max_draw_buffers,
                max_work_group_size: None,
            },
            Stage::Compute => StageLimits {
                max_uniform_components: self.max_compute_uniform_components,
                max_texture_image_units: self.max_compute_texture_image_units,
                max_input_locations: 0,
                max_output_locations: 0,
                max_work_group_size: Some(self.max_compute_work_group_size),
            },
        }
    }
}
