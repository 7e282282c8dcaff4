// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测数据结构

/// 人员类别名称 (COCO 类别 0)
pub const PERSON_LABEL: &str = "person";

/// COCO 80 类 (模型元数据缺少 names 时使用)
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// 单张图片的模型输出 (仅检测任务)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub bboxes: Vec<Bbox>,
}

impl DetectionResult {
    pub fn new(bboxes: Vec<Bbox>) -> Self {
        Self { bboxes }
    }

    pub fn bboxes(&self) -> &[Bbox] {
        &self.bboxes
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 带类别名称的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: Bbox,
}

impl Detection {
    /// 根据类别表为检测框命名
    pub fn from_bbox(bbox: Bbox, names: &[String]) -> Self {
        let class_id = bbox.id();
        let label = names
            .get(class_id)
            .cloned()
            .or_else(|| COCO_CLASSES.get(class_id).map(|s| s.to_string()))
            .unwrap_or_else(|| format!("class_{class_id}"));
        Self {
            label,
            class_id,
            confidence: bbox.confidence(),
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.label == PERSON_LABEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = Bbox::new(20.0, 20.0, 10.0, 10.0, 0, 0.9);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn labels_fall_back_to_coco_names() {
        let bbox = Bbox::new(0.0, 0.0, 1.0, 1.0, 5, 0.5);
        assert_eq!(Detection::from_bbox(bbox.clone(), &[]).label, "bus");

        let custom = vec!["passageiro".to_string()];
        let det = Detection::from_bbox(Bbox::new(0.0, 0.0, 1.0, 1.0, 0, 0.5), &custom);
        assert_eq!(det.label, "passageiro");
        assert!(!det.is_person());

        let unknown = Detection::from_bbox(Bbox::new(0.0, 0.0, 1.0, 1.0, 99, 0.5), &[]);
        assert_eq!(unknown.label, "class_99");
    }
}
